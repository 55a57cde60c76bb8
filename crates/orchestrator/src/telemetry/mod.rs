#![forbid(unsafe_code)]

mod rollup;
mod sample;
mod sampler;
mod store;

pub use rollup::{LongTermRollup, ROLLUP_SPAN, peaks};
pub use sample::Sample;
pub use sampler::{CounterSource, ProcNetDev, RateTracker, TrafficSampler};
pub use store::WindowedStore;
