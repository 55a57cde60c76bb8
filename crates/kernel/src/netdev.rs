//! Per-interface byte counters from `/proc/net/dev`.

use crate::Error;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Current counters for every interface the kernel reports.
pub fn read_counters() -> Result<HashMap<String, Counters>, Error> {
    let status = procfs::net::dev_status()?;
    Ok(status
        .into_iter()
        .map(|(name, dev)| {
            (
                name,
                Counters {
                    rx_bytes: dev.recv_bytes,
                    tx_bytes: dev.sent_bytes,
                },
            )
        })
        .collect())
}

/// Smallest elapsed time used as a divisor.
pub const MIN_ELAPSED_SECS: f64 = 1e-3;

/// Bytes per second between two readings of a monotonically increasing
/// counter.
///
/// A counter that went backwards (interface reset, wrap) yields `0.0` for
/// that interval rather than a negative or huge rate.
///
/// ```
/// # use kernel::netdev::rate;
/// assert_eq!(rate(1000, 3000, 2.0), 1000.0);
/// assert_eq!(rate(3000, 1000, 2.0), 0.0);
/// ```
pub fn rate(prev: u64, now: u64, elapsed_secs: f64) -> f64 {
    let delta = now.saturating_sub(prev);
    delta as f64 / elapsed_secs.max(MIN_ELAPSED_SECS)
}
