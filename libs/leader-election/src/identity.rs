//! Default participant identity and deployment namespace.
//!
//! Both are resolved once before the election starts and never retried.

use std::ffi::OsString;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{ElectionError, ElectionResult};

/// Where an in-cluster workload finds the namespace it was deployed into.
pub const DEFAULT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// `<hostname>_<uuid>`, unique across restarts on the same host.
pub fn generate_identity() -> ElectionResult<String> {
    identity_from_hostname(hostname::get())
}

fn identity_from_hostname(hostname: io::Result<OsString>) -> ElectionResult<String> {
    let hostname = hostname
        .map_err(|e| ElectionError::Config(format!("unable to resolve local hostname: {e}")))?;
    let hostname = hostname.to_string_lossy();
    let hostname = hostname.trim();
    if hostname.is_empty() {
        return Err(ElectionError::Config(
            "local hostname is empty; set an explicit election id".into(),
        ));
    }
    Ok(format!("{hostname}_{}", uuid::Uuid::new_v4()))
}

/// Read the deployment namespace from `path`.
pub fn namespace_from_file(path: &Path) -> ElectionResult<String> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ElectionError::Config(format!(
            "unable to find the namespace of this process (reading '{}': {e}); \
             set the record namespace explicitly when running outside the cluster",
            path.display()
        ))
    })?;
    let namespace = contents.trim();
    if namespace.is_empty() {
        return Err(ElectionError::Config(format!(
            "namespace file '{}' is empty; set the record namespace explicitly",
            path.display()
        )));
    }
    debug!(namespace, path = %path.display(), "resolved namespace from file");
    Ok(namespace.to_owned())
}
