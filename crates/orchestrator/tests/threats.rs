#![forbid(unsafe_code)]

use async_trait::async_trait;
use orchestrator::Error;
use orchestrator::threats::{
    Analyzer, Blocker, Blocklist, Classifier, OfflineClassifier, ResponseAction, Severity,
    ThreatPipeline, Verdict,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

#[derive(Default)]
struct RecordingBlocker(Mutex<Vec<IpAddr>>);

#[async_trait]
impl Blocker for RecordingBlocker {
    async fn block(&self, ip: IpAddr) -> Result<(), Error> {
        self.0.lock().push(ip);
        Ok(())
    }
}

struct Forced(Severity);

#[async_trait]
impl Classifier for Forced {
    async fn classify(&self, _message: &str) -> Result<Verdict, Error> {
        Ok(Verdict {
            severity: self.0,
            explanation: Some("forced".into()),
            ip: None,
            analyzer: Analyzer::Remote,
        })
    }
}

struct Unreachable;

#[async_trait]
impl Classifier for Unreachable {
    async fn classify(&self, _message: &str) -> Result<Verdict, Error> {
        Err(Error::Classifier("connection refused".into()))
    }
}

fn pipeline(
    classifier: Arc<dyn Classifier>,
    blocker: Arc<RecordingBlocker>,
    capacity: usize,
) -> ThreatPipeline {
    ThreatPipeline::new(classifier, blocker, Blocklist::in_memory(), capacity).unwrap()
}

#[tokio::test]
async fn ledger_keeps_the_newest_500_in_order() {
    let threats = pipeline(
        Arc::new(OfflineClassifier),
        Arc::new(RecordingBlocker::default()),
        500,
    );
    for i in 0..501 {
        threats.analyze("test", &format!("event {i}")).await;
    }

    let events = threats.list_events();
    assert_eq!(events.len(), 500);
    assert!(events.iter().all(|e| e.message != "event 0"));
    let messages: Vec<String> = events.iter().map(|e| e.message.clone()).collect();
    let expected: Vec<String> = (1..501).map(|i| format!("event {i}")).collect();
    assert_eq!(messages, expected);
}

#[tokio::test]
async fn critical_event_blocks_extracted_address() {
    let blocker = Arc::new(RecordingBlocker::default());
    let threats = pipeline(Arc::new(Forced(Severity::Critical)), blocker.clone(), 500);

    let event = threats
        .analyze("manual", "possible breach from 10.0.0.5")
        .await;
    assert_eq!(event.ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(event.action, Some(ResponseAction::BlockedIp));
    assert_eq!(event.severity, Severity::Critical);
    assert_eq!(blocker.0.lock().clone(), vec![IpAddr::from([10, 0, 0, 5])]);
    assert_eq!(threats.blocklist(), vec![IpAddr::from([10, 0, 0, 5])]);

    let stored = threats.list_events();
    assert_eq!(stored, vec![event.clone()]);
    assert_eq!(stored[0].context["analyzer"], "remote");
}

#[tokio::test]
async fn medium_event_is_never_blocked() {
    let blocker = Arc::new(RecordingBlocker::default());
    let threats = pipeline(Arc::new(Forced(Severity::Medium)), blocker.clone(), 500);
    let event = threats.analyze("manual", "odd traffic from 10.0.0.5").await;
    assert_eq!(event.action, None);
    assert!(blocker.0.lock().is_empty());
}

#[tokio::test]
async fn classifier_failure_falls_back_to_info() {
    let threats = pipeline(
        Arc::new(Unreachable),
        Arc::new(RecordingBlocker::default()),
        500,
    );
    let event = threats.analyze("suricata", "alert from 10.0.0.5").await;
    assert_eq!(event.severity, Severity::Info);
    assert_eq!(event.explanation, None);
    assert_eq!(event.ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(event.context["analyzer"], "local");
    assert!(event.context.contains_key("classifier_error"));
}

#[tokio::test]
async fn concurrent_analysis_keeps_ledger_consistent() {
    let threats = Arc::new(pipeline(
        Arc::new(OfflineClassifier),
        Arc::new(RecordingBlocker::default()),
        50,
    ));
    let handles: Vec<_> = (0..100)
        .map(|i| {
            let threats = Arc::clone(&threats);
            tokio::spawn(async move { threats.analyze("load", &format!("event {i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    let events = threats.list_events();
    assert_eq!(events.len(), 50);
    let mut ids: Vec<_> = events.iter().map(|e| e.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn manual_block_is_recorded() {
    let blocker = Arc::new(RecordingBlocker::default());
    let threats = pipeline(Arc::new(OfflineClassifier), blocker.clone(), 10);
    let ip = threats.block_address(" 2001:db8::7 ").await.unwrap();
    assert_eq!(ip, "2001:db8::7".parse::<IpAddr>().unwrap());
    assert_eq!(threats.blocklist(), vec![ip]);
}

proptest! {
    #[test]
    fn ledger_never_exceeds_capacity(capacity in 1usize..40, count in 0usize..120) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let threats = pipeline(
            Arc::new(OfflineClassifier),
            Arc::new(RecordingBlocker::default()),
            capacity,
        );
        runtime.block_on(async {
            for i in 0..count {
                threats.analyze("prop", &format!("{i}")).await;
            }
        });
        let events = threats.list_events();
        prop_assert_eq!(events.len(), count.min(capacity));
        if let Some(last) = events.last() {
            prop_assert_eq!(last.message.clone(), format!("{}", count - 1));
        }
    }
}
