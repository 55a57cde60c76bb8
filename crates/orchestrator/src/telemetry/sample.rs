#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// One rate observation. Persisted as a `[ts, rx, tx]` triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, f64)", into = "(f64, f64, f64)")]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub ts: f64,
    /// Receive rate, bytes per second.
    pub rx: f64,
    /// Transmit rate, bytes per second.
    pub tx: f64,
}

impl Sample {
    pub fn new(ts: f64, rx: f64, tx: f64) -> Self {
        Self { ts, rx, tx }
    }
}

impl From<(f64, f64, f64)> for Sample {
    fn from((ts, rx, tx): (f64, f64, f64)) -> Self {
        Self { ts, rx, tx }
    }
}

impl From<Sample> for (f64, f64, f64) {
    fn from(sample: Sample) -> Self {
        (sample.ts, sample.rx, sample.tx)
    }
}
