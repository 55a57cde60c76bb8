#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::persistence::SnapshotRepository;
use crate::tasks::pause;
use crate::telemetry::{Sample, WindowedStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Span of short-term history folded into each long-term sample.
pub const ROLLUP_SPAN: Duration = Duration::from_secs(60);

/// Per-key maximum of each rate over `window`, stamped at `ts`.
///
/// Peaks rather than averages keep short bursts visible in long-term history.
/// Keys with no samples are skipped.
pub fn peaks(window: &BTreeMap<String, Vec<Sample>>, ts: f64) -> Vec<(String, Sample)> {
    window
        .iter()
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(key, samples)| {
            let rx = samples.iter().map(|s| s.rx).fold(0.0, f64::max);
            let tx = samples.iter().map(|s| s.tx).fold(0.0, f64::max);
            (key.clone(), Sample::new(ts, rx, tx))
        })
        .collect()
}

/// Folds the short-term store into the long-term one once per interval.
pub struct LongTermRollup {
    short_term: Arc<WindowedStore>,
    long_term: Arc<WindowedStore>,
    repo: Arc<dyn SnapshotRepository>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl LongTermRollup {
    pub fn new(
        short_term: Arc<WindowedStore>,
        long_term: Arc<WindowedStore>,
        repo: Arc<dyn SnapshotRepository>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            short_term,
            long_term,
            repo,
            clock,
            interval,
        }
    }

    /// Append one peak sample per active key and persist the long-term store.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();
        // Snapshot under the short-term lock, compute unlocked.
        let window = self.short_term.window(now, None, ROLLUP_SPAN);
        let peaks = peaks(&window, now);
        let appended = peaks.len();
        self.long_term
            .append_all(peaks.iter().map(|(key, sample)| (key.as_str(), *sample)));

        if let Err(err) = self.repo.save(&self.long_term.snapshot()).await {
            warn!(%err, "failed to persist long-term telemetry");
        }
        debug!(appended, "long-term rollup");
        appended
    }

    pub async fn run(self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if !pause(self.clock.as_ref(), &cancel, self.interval).await {
                break;
            }
            self.tick().await;
        }
    }
}
