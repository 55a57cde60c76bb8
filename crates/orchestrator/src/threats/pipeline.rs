#![forbid(unsafe_code)]

use crate::error::Error;
use crate::threats::{
    Blocker, Blocklist, Classifier, Ledger, ResponseAction, ThreatEvent, Verdict,
};
use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Classifies incoming security signals, reacts to severe ones and keeps a
/// bounded history.
///
/// Classification runs without any lock held, so concurrent callers overlap
/// freely; only the ledger append is serialized.
pub struct ThreatPipeline {
    classifier: Arc<dyn Classifier>,
    blocker: Arc<dyn Blocker>,
    blocklist: Blocklist,
    ledger: Mutex<Ledger>,
    dotted_quad: Regex,
}

impl ThreatPipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        blocker: Arc<dyn Blocker>,
        blocklist: Blocklist,
        capacity: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            classifier,
            blocker,
            blocklist,
            ledger: Mutex::new(Ledger::new(capacity)),
            dotted_quad: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b")?,
        })
    }

    pub async fn analyze(&self, source: &str, message: &str) -> ThreatEvent {
        let mut context = Map::new();
        let verdict = match self.classifier.classify(message).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(%source, %err, "classifier unavailable, using local verdict");
                context.insert("classifier_error".into(), Value::String(err.to_string()));
                Verdict::local()
            }
        };
        context.insert(
            "analyzer".into(),
            Value::String(verdict.analyzer.as_str().into()),
        );

        let ip = verdict.ip.or_else(|| self.extract_ipv4(message));
        let mut event = ThreatEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.to_owned(),
            message: message.to_owned(),
            severity: verdict.severity,
            explanation: verdict.explanation,
            ip,
            action: None,
            context,
        };

        if let Some(ip) = event.ip.filter(|_| event.severity.warrants_block()) {
            match self.block(IpAddr::V4(ip)).await {
                Ok(()) => event.action = Some(ResponseAction::BlockedIp),
                Err(err) => warn!(%ip, %err, "automatic block failed"),
            }
        }

        info!(
            %source,
            severity = %event.severity,
            ip = ?event.ip,
            action = ?event.action,
            analyzer = verdict.analyzer.as_str(),
            "threat event recorded"
        );
        self.ledger.lock().push(event.clone());
        event
    }

    /// Copy of the ledger, oldest first.
    pub fn list_events(&self) -> Vec<ThreatEvent> {
        self.ledger.lock().to_vec()
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.lock().is_empty()
    }

    /// Block `address` on operator request.
    pub async fn block_address(&self, address: &str) -> Result<IpAddr, Error> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("invalid IP address: {address}")))?;
        self.block(ip).await?;
        Ok(ip)
    }

    pub fn blocklist(&self) -> Vec<IpAddr> {
        self.blocklist.entries()
    }

    async fn block(&self, ip: IpAddr) -> Result<(), Error> {
        self.blocker.block(ip).await?;
        if let Err(err) = self.blocklist.insert(ip).await {
            warn!(%ip, %err, "failed to persist blocklist");
        }
        Ok(())
    }

    /// First dotted quad in `message` that is a valid IPv4 address.
    fn extract_ipv4(&self, message: &str) -> Option<Ipv4Addr> {
        self.dotted_quad
            .find_iter(message)
            .find_map(|m| m.as_str().parse().ok())
    }
}
