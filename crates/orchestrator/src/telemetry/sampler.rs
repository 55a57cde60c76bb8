#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::error::Error;
use crate::tasks::pause;
use crate::telemetry::{Sample, WindowedStore};
use async_trait::async_trait;
use kernel::netdev::{self, Counters, MIN_ELAPSED_SECS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Source of cumulative per-interface byte counters.
#[async_trait]
pub trait CounterSource: Send + Sync {
    async fn read(&self) -> Result<HashMap<String, Counters>, Error>;
}

/// Counters from `/proc/net/dev`.
#[derive(Debug, Default)]
pub struct ProcNetDev;

#[async_trait]
impl CounterSource for ProcNetDev {
    async fn read(&self) -> Result<HashMap<String, Counters>, Error> {
        Ok(tokio::task::spawn_blocking(netdev::read_counters).await??)
    }
}

/// Turns successive counter readings into rate samples.
#[derive(Debug, Default)]
pub struct RateTracker {
    previous: Option<(f64, HashMap<String, Counters>)>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading taken at `now`. The first reading, and any interface
    /// missing from the previous reading, produce no sample.
    pub fn observe(&mut self, now: f64, counters: HashMap<String, Counters>) -> Vec<(String, Sample)> {
        let samples = match &self.previous {
            Some((then, previous)) => {
                let elapsed = (now - then).max(MIN_ELAPSED_SECS);
                let mut samples: Vec<(String, Sample)> = counters
                    .iter()
                    .filter_map(|(name, current)| {
                        let prev = previous.get(name)?;
                        let rx = netdev::rate(prev.rx_bytes, current.rx_bytes, elapsed);
                        let tx = netdev::rate(prev.tx_bytes, current.tx_bytes, elapsed);
                        Some((name.clone(), Sample::new(now, rx, tx)))
                    })
                    .collect();
                samples.sort_by(|a, b| a.0.cmp(&b.0));
                samples
            }
            None => Vec::new(),
        };
        self.previous = Some((now, counters));
        samples
    }
}

/// Producer of the short-term store.
pub struct TrafficSampler {
    source: Arc<dyn CounterSource>,
    store: Arc<WindowedStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    tracker: RateTracker,
}

impl TrafficSampler {
    pub fn new(
        source: Arc<dyn CounterSource>,
        store: Arc<WindowedStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            interval,
            tracker: RateTracker::new(),
        }
    }

    /// Take one reading and append the resulting rates.
    pub async fn tick(&mut self) -> Result<usize, Error> {
        let counters = self.source.read().await?;
        let now = self.clock.now();
        let samples = self.tracker.observe(now, counters);
        let appended = samples.len();
        self.store
            .append_all(samples.iter().map(|(key, sample)| (key.as_str(), *sample)));
        trace!(appended, "traffic sampled");
        Ok(appended)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(err) = self.tick().await {
                debug!(%err, "counter read failed");
            }
            if !pause(self.clock.as_ref(), &cancel, self.interval).await {
                break;
            }
        }
    }
}
