#![forbid(unsafe_code)]

use crate::persistence::{TELEMETRY_SCHEMA_VERSION, TelemetrySnapshot};
use crate::telemetry::Sample;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::trace;

/// Time-ordered, bounded sample series per key.
///
/// Samples older than the retention horizon are evicted lazily, both when a
/// newer sample is appended and when a window is read. Every public method
/// takes the lock once, applies a full read or mutation, and releases it.
#[derive(Debug)]
pub struct WindowedStore {
    name: &'static str,
    retention: f64,
    capacity: usize,
    series: Mutex<HashMap<String, VecDeque<Sample>>>,
}

impl WindowedStore {
    /// `capacity` caps each key independently of `retention`.
    pub fn new(name: &'static str, retention: Duration, capacity: usize) -> Self {
        Self {
            name,
            retention: retention.as_secs_f64(),
            capacity: capacity.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs_f64(self.retention)
    }

    /// Append a sample. Callers append in increasing time order.
    pub fn append(&self, key: &str, sample: Sample) {
        let mut series = self.series.lock();
        let samples = series.entry(key.to_owned()).or_default();
        self.push(samples, sample);
    }

    /// Append one sample per key under a single lock acquisition.
    pub fn append_all<'a>(&self, samples: impl IntoIterator<Item = (&'a str, Sample)>) {
        let mut series = self.series.lock();
        for (key, sample) in samples {
            let entry = series.entry(key.to_owned()).or_default();
            self.push(entry, sample);
        }
    }

    /// Samples with `ts >= now - window`, ascending by time.
    ///
    /// `key = None` selects every key. An unknown key maps to an empty list.
    pub fn window(
        &self,
        now: f64,
        key: Option<&str>,
        window: Duration,
    ) -> BTreeMap<String, Vec<Sample>> {
        let start = now - window.as_secs_f64();
        let horizon = now - self.retention;
        let mut series = self.series.lock();
        for samples in series.values_mut() {
            evict_before(samples, horizon);
        }

        let collect = |samples: &VecDeque<Sample>| -> Vec<Sample> {
            samples.iter().filter(|s| s.ts >= start).copied().collect()
        };
        match key {
            Some(key) => {
                let samples = series.get(key).map(collect).unwrap_or_default();
                BTreeMap::from([(key.to_owned(), samples)])
            }
            None => series
                .iter()
                .map(|(key, samples)| (key.clone(), collect(samples)))
                .collect(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.series.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total number of samples across all keys.
    pub fn len(&self) -> usize {
        self.series.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let series = self.series.lock();
        TelemetrySnapshot {
            version: TELEMETRY_SCHEMA_VERSION,
            per_key: series
                .iter()
                .map(|(key, samples)| (key.clone(), samples.iter().copied().collect()))
                .collect(),
        }
    }

    /// Replace the contents with `snapshot`, re-applying the capacity bound
    /// and the ascending-time order.
    pub fn restore(&self, snapshot: TelemetrySnapshot) {
        let mut restored = HashMap::with_capacity(snapshot.per_key.len());
        for (key, mut samples) in snapshot.per_key {
            samples.retain(|s| s.ts.is_finite());
            samples.sort_by(|a, b| a.ts.total_cmp(&b.ts));
            let skip = samples.len().saturating_sub(self.capacity);
            restored.insert(key, samples.into_iter().skip(skip).collect());
        }
        trace!(store = self.name, keys = restored.len(), "restored samples");
        *self.series.lock() = restored;
    }

    fn push(&self, samples: &mut VecDeque<Sample>, sample: Sample) {
        samples.push_back(sample);
        evict_before(samples, sample.ts - self.retention);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }
}

fn evict_before(samples: &mut VecDeque<Sample>, horizon: f64) {
    while samples.front().is_some_and(|s| s.ts < horizon) {
        samples.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn ramp(store: &WindowedStore, key: &str, range: std::ops::RangeInclusive<u32>) {
        for t in range {
            let t = f64::from(t);
            store.append(key, Sample::new(t, 10.0 * t, 5.0 * t));
        }
    }

    #[test]
    fn window_returns_retained_tail_in_order() {
        let store = WindowedStore::new("test", Duration::from_secs(5), 1000);
        ramp(&store, "eth0", 0..=10);

        let window = store.window(10.0, Some("eth0"), Duration::from_secs(5));
        let expected: Vec<Sample> = (5..=10)
            .map(f64::from)
            .map(|t| Sample::new(t, 10.0 * t, 5.0 * t))
            .collect();
        assert_eq!(window["eth0"], expected);
    }

    #[test]
    fn unknown_key_is_empty() {
        let store = WindowedStore::new("test", Duration::from_secs(60), 10);
        let window = store.window(0.0, Some("wlan9"), Duration::from_secs(60));
        assert_eq!(window.get("wlan9"), Some(&Vec::new()));
    }

    #[test]
    fn read_evicts_past_retention() {
        let store = WindowedStore::new("test", Duration::from_secs(10), 100);
        ramp(&store, "eth0", 0..=4);
        assert_eq!(store.len(), 5);

        let window = store.window(100.0, None, Duration::from_secs(1000));
        assert!(window["eth0"].is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn capacity_drops_oldest() {
        let store = WindowedStore::new("test", Duration::from_secs(3600), 3);
        ramp(&store, "eth0", 0..=9);
        let window = store.window(9.0, Some("eth0"), Duration::from_secs(3600));
        let ts: Vec<f64> = window["eth0"].iter().map(|s| s.ts).collect();
        assert_eq!(ts, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn restore_sorts_and_bounds() {
        let store = WindowedStore::new("test", Duration::from_secs(3600), 2);
        let snapshot = TelemetrySnapshot {
            version: TELEMETRY_SCHEMA_VERSION,
            per_key: BTreeMap::from([(
                "eth0".to_string(),
                vec![
                    Sample::new(3.0, 0.0, 0.0),
                    Sample::new(1.0, 0.0, 0.0),
                    Sample::new(2.0, 0.0, 0.0),
                ],
            )]),
        };
        store.restore(snapshot);
        let ts: Vec<f64> = store.snapshot().per_key["eth0"].iter().map(|s| s.ts).collect();
        assert_eq!(ts, vec![2.0, 3.0]);
    }

    proptest! {
        #[test]
        fn window_never_exceeds_bounds(
            count in 1usize..200,
            retention in 1u64..50,
            window in 0u64..100,
        ) {
            let store = WindowedStore::new("prop", Duration::from_secs(retention), 64);
            for t in 0..count {
                store.append("k", Sample::new(t as f64, 1.0, 1.0));
            }
            let now = (count - 1) as f64;
            let got = store.window(now, Some("k"), Duration::from_secs(window));
            let samples = &got["k"];
            prop_assert!(samples.len() <= 64);
            prop_assert!(samples.windows(2).all(|w| w[0].ts < w[1].ts));
            prop_assert!(samples.iter().all(|s| s.ts >= now - window as f64));
            prop_assert!(samples.iter().all(|s| s.ts >= now - retention as f64));
        }
    }
}
