//! Election configuration.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ElectionError, ElectionResult};
use crate::identity::{self, DEFAULT_NAMESPACE_FILE};
use crate::store::RecordKey;

/// How long a non-holder waits without seeing a renewal before taking over.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
/// How long the holder keeps retrying renewal before stepping down.
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
/// Interval between acquisition and renewal attempts.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Settings for one election, fixed once the elector starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    /// Identity of this participant. Empty means `<hostname>_<uuid>`.
    pub election_id: String,
    /// Namespace of the lock record. Empty means read `namespace_file`.
    pub record_namespace: String,
    /// Name of the lock record. Required.
    pub record_name: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    /// Vacate the record when the caller cancels while leading.
    pub release_on_cancel: bool,
    /// Consulted only when `record_namespace` is empty.
    pub namespace_file: PathBuf,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_id: String::new(),
            record_namespace: String::new(),
            record_name: String::new(),
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
            release_on_cancel: true,
            namespace_file: PathBuf::from(DEFAULT_NAMESPACE_FILE),
        }
    }
}

impl ElectionConfig {
    /// Config for the record `name` with default timings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            record_name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_identity(mut self, election_id: impl Into<String>) -> Self {
        self.election_id = election_id.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.record_namespace = namespace.into();
        self
    }

    pub fn with_timings(
        mut self,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        self.lease_duration = lease_duration;
        self.renew_deadline = renew_deadline;
        self.retry_period = retry_period;
        self
    }

    pub fn with_release_on_cancel(mut self, release: bool) -> Self {
        self.release_on_cancel = release;
        self
    }

    /// Check required fields and `lease_duration > renew_deadline > retry_period > 0`.
    pub fn validate(&self) -> ElectionResult<()> {
        if self.record_name.trim().is_empty() {
            return Err(ElectionError::Config("record_name is required".into()));
        }
        if self.retry_period.is_zero() {
            return Err(ElectionError::Config(
                "retry_period must be greater than zero".into(),
            ));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(ElectionError::Config(format!(
                "renew_deadline ({:?}) must be greater than retry_period ({:?})",
                self.renew_deadline, self.retry_period
            )));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ElectionError::Config(format!(
                "lease_duration ({:?}) must be greater than renew_deadline ({:?})",
                self.lease_duration, self.renew_deadline
            )));
        }
        if self.renew_deadline < self.retry_period * 2 {
            warn!(
                renew_deadline = ?self.renew_deadline,
                retry_period = ?self.retry_period,
                "renew_deadline is less than twice retry_period; a single slow renewal may cause stepping down"
            );
        }
        Ok(())
    }

    /// Validate, then fill in a missing identity and namespace.
    pub fn resolve(&self) -> ElectionResult<ElectionConfig> {
        self.validate()?;
        let mut resolved = self.clone();
        if resolved.election_id.trim().is_empty() {
            resolved.election_id = identity::generate_identity()?;
            info!(identity = %resolved.election_id, "generated election identity");
        }
        if resolved.record_namespace.trim().is_empty() {
            resolved.record_namespace = identity::namespace_from_file(&resolved.namespace_file)?;
        }
        Ok(resolved)
    }

    /// Key of the lock record this config targets.
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.record_namespace.clone(), self.record_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_defaults() {
        let cfg = ElectionConfig::new("scheduler");
        assert_eq!(cfg.lease_duration, secs(15));
        assert_eq!(cfg.renew_deadline, secs(10));
        assert_eq!(cfg.retry_period, secs(2));
        assert!(cfg.release_on_cancel);
        assert_eq!(cfg.namespace_file, PathBuf::from(DEFAULT_NAMESPACE_FILE));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_name() {
        let err = ElectionConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("record_name"));
    }

    #[test]
    fn test_duration_ordering() {
        let cases = [
            (secs(15), secs(10), secs(0)),
            (secs(15), secs(2), secs(2)),
            (secs(15), secs(1), secs(2)),
            (secs(10), secs(10), secs(2)),
            (secs(5), secs(10), secs(2)),
        ];
        for (lease, renew, retry) in cases {
            let cfg = ElectionConfig::new("x").with_timings(lease, renew, retry);
            assert!(
                matches!(cfg.validate(), Err(ElectionError::Config(_))),
                "{lease:?}/{renew:?}/{retry:?} should be rejected"
            );
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_tight_renew_deadline_warns() {
        let cfg = ElectionConfig::new("x").with_timings(secs(15), secs(3), secs(2));
        assert!(cfg.validate().is_ok());
        assert!(logs_contain("less than twice retry_period"));
    }

    #[test]
    fn test_resolve_keeps_explicit_values() {
        let cfg = ElectionConfig::new("scheduler")
            .with_identity("node-a")
            .with_namespace("ops");
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved, cfg);
        assert_eq!(resolved.record_key(), RecordKey::new("ops", "scheduler"));
    }

    #[test]
    fn test_resolve_fills_identity_and_namespace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "billing").unwrap();
        let mut cfg = ElectionConfig::new("scheduler");
        cfg.namespace_file = file.path().to_path_buf();

        let resolved = cfg.resolve().unwrap();
        assert!(!resolved.election_id.is_empty());
        assert_eq!(resolved.record_namespace, "billing");
    }

    #[test]
    fn test_resolve_fails_without_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ElectionConfig::new("scheduler").with_identity("node-a");
        cfg.namespace_file = dir.path().join("missing");
        assert!(matches!(cfg.resolve(), Err(ElectionError::Config(_))));
    }

    #[test]
    fn test_resolve_validates_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ElectionConfig::new("scheduler").with_timings(secs(1), secs(2), secs(3));
        cfg.namespace_file = dir.path().join("missing");
        let err = cfg.resolve().unwrap_err();
        assert!(err.to_string().contains("renew_deadline"));
    }
}
