#![forbid(unsafe_code)]

mod classifier;
mod event;
mod ledger;
mod pipeline;
mod response;

pub use classifier::{
    Analyzer, Classifier, ConfiguredClassifier, MAX_EXPLANATION_CHARS, OfflineClassifier,
    RemoteClassifier, Verdict, parse_verdict,
};
pub use event::{ResponseAction, Severity, ThreatEvent};
pub use ledger::Ledger;
pub use pipeline::ThreatPipeline;
pub use response::{Blocker, Blocklist, FirewallBlocker};
