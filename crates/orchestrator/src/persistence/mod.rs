#![forbid(unsafe_code)]

mod repo;
mod snapshot;

pub use repo::{JsonFileRepository, NoopRepository, SnapshotRepository, write_private};
pub use snapshot::{TELEMETRY_SCHEMA_VERSION, TelemetrySnapshot};
