#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::detectors::{EventSink, LineSink, LogTailer};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SOURCE: &str = "suricata";

/// Which alert stream to follow. Only one is ever followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertFeed {
    /// Structured EVE JSON, one object per line.
    Eve(PathBuf),
    /// Plain-text fast log, forwarded verbatim.
    Fast(PathBuf),
}

impl AlertFeed {
    /// The EVE log if it exists, else the fast log if it exists.
    pub async fn select(eve: &Path, fast: &Path) -> Option<Self> {
        if tokio::fs::try_exists(eve).await.unwrap_or(false) {
            Some(Self::Eve(eve.to_owned()))
        } else if tokio::fs::try_exists(fast).await.unwrap_or(false) {
            Some(Self::Fast(fast.to_owned()))
        } else {
            None
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Eve(path) | Self::Fast(path) => path,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EveRecord {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    alert: Option<EveAlert>,
    #[serde(default)]
    src_ip: Option<String>,
    #[serde(default)]
    dest_ip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EveAlert {
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    severity: Option<Value>,
}

/// Message for an EVE alert record; `None` for other event types and for
/// lines that are not JSON.
pub fn format_eve(line: &str) -> Option<String> {
    let record: EveRecord = serde_json::from_str(line).ok()?;
    if record.event_type.as_deref() != Some("alert") {
        return None;
    }
    let alert = record.alert.unwrap_or_default();
    let signature = alert.signature.as_deref().unwrap_or("unknown");
    let severity = match alert.severity {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => "unknown".into(),
    };
    let src = record.src_ip.as_deref().unwrap_or("unknown");
    let dst = record.dest_ip.as_deref().unwrap_or("unknown");
    Some(format!(
        "Suricata alert: {signature} (sev={severity}) src={src} dst={dst}"
    ))
}

/// Relays IDS alerts into the threat pipeline.
pub struct IntrusionMonitor {
    sink: Arc<dyn EventSink>,
    feed: AlertFeed,
}

impl IntrusionMonitor {
    pub fn new(sink: Arc<dyn EventSink>, feed: AlertFeed) -> Self {
        Self { sink, feed }
    }

    pub async fn run(
        self,
        clock: Arc<dyn Clock>,
        poll: Duration,
        cancel: CancellationToken,
    ) {
        info!(feed = ?self.feed, "following IDS alerts");
        let result = match LogTailer::open(self.feed.path()).await {
            Ok(tailer) => tailer.follow(&self, clock.as_ref(), poll, &cancel).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(path = %self.feed.path().display(), %err, "IDS monitor stopped");
        }
    }
}

#[async_trait]
impl LineSink for IntrusionMonitor {
    async fn line(&self, line: &str) {
        let message = match &self.feed {
            AlertFeed::Eve(_) => format_eve(line),
            AlertFeed::Fast(_) => Some(line.trim().to_owned()).filter(|l| !l.is_empty()),
        };
        if let Some(message) = message {
            self.sink.submit(SOURCE, &message).await;
        }
    }
}
