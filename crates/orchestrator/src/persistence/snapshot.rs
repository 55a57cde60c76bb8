#![forbid(unsafe_code)]

use crate::telemetry::Sample;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TELEMETRY_SCHEMA_VERSION: u32 = 1;

/// On-disk form of a telemetry store: `{"version": 1, "perKey": {"eth0": [[ts, rx, tx], ...]}}`.
///
/// A document without a `version` field deserializes with version `0` and is
/// therefore treated as a mismatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(rename = "perKey", default)]
    pub per_key: BTreeMap<String, Vec<Sample>>,
}

/// Just the version of a snapshot document, read before the samples so a
/// foreign layout never has to parse.
#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotHeader {
    #[serde(default)]
    pub version: u32,
}

impl SnapshotHeader {
    pub fn is_current(&self) -> bool {
        self.version == TELEMETRY_SCHEMA_VERSION
    }
}

impl TelemetrySnapshot {
    pub fn empty() -> Self {
        Self {
            version: TELEMETRY_SCHEMA_VERSION,
            per_key: BTreeMap::new(),
        }
    }

    pub fn is_current(&self) -> bool {
        self.version == TELEMETRY_SCHEMA_VERSION
    }
}
