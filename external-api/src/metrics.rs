//! Process-level metrics served next to the election metrics.
#![allow(missing_docs)] // proc macros dont play nicely with docstrings

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{IntGauge, register_int_gauge};

lazy_static! {
    /// When the process started; touch it early in `main`
    pub static ref START_TIME: Instant = Instant::now();

    /// seconds since `START_TIME`
    pub static ref UPTIME: IntGauge = register_int_gauge!("uptime", "server uptime (seconds)").unwrap();
}
