//! Election metrics, labelled by `election` (`<namespace>/<name>`).
//!
//! Registered in the default prometheus registry on first access.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGaugeVec, register_int_counter_vec, register_int_gauge_vec};

lazy_static! {
    /// 1 while this process holds the lease, 0 otherwise
    pub static ref LEADER: IntGaugeVec = register_int_gauge_vec!(
        "leader_election_is_leader",
        "1 while this process holds the lease",
        &["election"]
    ).unwrap();

    /// Count of times this process became leader
    pub static ref ACQUISITIONS: IntCounterVec = register_int_counter_vec!(
        "leader_election_acquisitions",
        "count of times this process became leader",
        &["election"]
    ).unwrap();

    /// Count of times leadership was lost after the renew deadline
    pub static ref ABDICATIONS: IntCounterVec = register_int_counter_vec!(
        "leader_election_abdications",
        "count of times leadership was lost after missing the renew deadline",
        &["election"]
    ).unwrap();

    /// Count of failed renewal attempts
    pub static ref RENEW_FAILURES: IntCounterVec = register_int_counter_vec!(
        "leader_election_renew_failures",
        "count of failed renewal attempts",
        &["election"]
    ).unwrap();

    /// Count of failed release writes on cancellation
    pub static ref RELEASE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "leader_election_release_failures",
        "count of failed release writes",
        &["election"]
    ).unwrap();

    /// Count of holder changes observed while not leading
    pub static ref LEADER_CHANGES_OBSERVED: IntCounterVec = register_int_counter_vec!(
        "leader_election_leader_changes_observed",
        "count of new leaders observed",
        &["election"]
    ).unwrap();
}
