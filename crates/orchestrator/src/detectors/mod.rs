#![forbid(unsafe_code)]

//! Passive detectors. Each polls or tails one data source, applies a small
//! threshold rule and forwards qualifying observations to an [`EventSink`].

mod activity;
mod dns;
mod flow;
mod intrusion;
mod tail;

pub use activity::{Activity, ActivityMonitor, ClientActivity, FlowCounts, classify, tally};
pub use dns::{DnsMonitor, DnsObservation};
pub use flow::{ConnectionSource, FlowMonitor, FlowRules, SystemConnections, evaluate};
pub use intrusion::{AlertFeed, IntrusionMonitor, format_eve};
pub use tail::{LineSink, LogTailer};

use crate::threats::ThreatPipeline;
use async_trait::async_trait;

/// Receiver of detector findings.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn submit(&self, source: &str, message: &str);
}

#[async_trait]
impl EventSink for ThreatPipeline {
    async fn submit(&self, source: &str, message: &str) {
        self.analyze(source, message).await;
    }
}
