#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

const HOUR: u64 = 60 * 60;
const WEEK: u64 = 7 * 24 * HOUR;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Telemetry {
    /// Counter sampling cadence for the short-term store.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub sample_interval: Duration,

    #[serde_as(as = "serde_with::DurationSeconds")]
    pub short_term_retention: Duration,

    /// Hard cap on samples kept per key in the short-term store.
    pub short_term_capacity: usize,

    /// Cadence of the per-minute peak rollup.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub rollup_interval: Duration,

    #[serde_as(as = "serde_with::DurationSeconds")]
    pub long_term_retention: Duration,

    pub long_term_capacity: usize,

    /// Zero disables periodic saves; shutdown saves still apply.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub autosave_interval: Duration,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            short_term_retention: Duration::from_secs(HOUR),
            short_term_capacity: (HOUR * 6) as usize,
            rollup_interval: Duration::from_secs(60),
            long_term_retention: Duration::from_secs(WEEK),
            long_term_capacity: (WEEK / 60) as usize,
            autosave_interval: Duration::from_secs(5 * 60),
        }
    }
}
