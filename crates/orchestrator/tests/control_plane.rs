#![forbid(unsafe_code)]

use async_trait::async_trait;
use config::{Config, Upstream};
use kernel::link::Link;
use kernel::netdev::Counters;
use kernel::sockets::RemoteEndpoint;
use orchestrator::clock::{Clock, ManualClock};
use orchestrator::detectors::ConnectionSource;
use orchestrator::interfaces::{InterfaceProbe, NetworkActions, Role};
use orchestrator::persistence::{
    JsonFileRepository, NoopRepository, SnapshotRepository, TelemetrySnapshot,
};
use orchestrator::telemetry::CounterSource;
use orchestrator::threats::{Blocker, ConfiguredClassifier, Severity};
use orchestrator::{ControlPlane, Error, Services};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Byte counters that grow by a fixed amount on every read.
#[derive(Default)]
struct Ramp(Mutex<u64>);

#[async_trait]
impl CounterSource for Ramp {
    async fn read(&self) -> Result<HashMap<String, Counters>, Error> {
        let mut total = self.0.lock();
        *total += 1000;
        Ok(HashMap::from([(
            "eth0".to_string(),
            Counters {
                rx_bytes: *total,
                tx_bytes: *total / 2,
            },
        )]))
    }
}

struct OneRadio;

#[async_trait]
impl InterfaceProbe for OneRadio {
    async fn links(&self) -> Result<Vec<Link>, Error> {
        Ok(vec![Link {
            name: "wlan0".into(),
            is_up: true,
            is_wireless: true,
            mac_address: None,
            ipv4_addresses: vec!["192.168.4.1".parse().unwrap()],
        }])
    }

    async fn default_route(&self) -> Result<Option<String>, Error> {
        Ok(None)
    }

    async fn visible_networks(&self) -> Result<Vec<String>, Error> {
        Ok(Vec::new())
    }
}

struct NoActions;

#[async_trait]
impl NetworkActions for NoActions {
    async fn apply_network_config(&self, _iface: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn join_upstream(&self, _iface: &str, _upstream: &Upstream) -> Result<(), Error> {
        Ok(())
    }
}

struct AcceptAll;

#[async_trait]
impl Blocker for AcceptAll {
    async fn block(&self, _ip: IpAddr) -> Result<(), Error> {
        Ok(())
    }
}

struct NoConnections;

#[async_trait]
impl ConnectionSource for NoConnections {
    async fn endpoints(&self) -> Result<Vec<RemoteEndpoint>, Error> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct CountingRepository {
    saves: AtomicUsize,
}

#[async_trait]
impl SnapshotRepository for CountingRepository {
    async fn load(&self) -> Result<TelemetrySnapshot, Error> {
        Ok(TelemetrySnapshot::empty())
    }

    async fn save(&self, _snapshot: &TelemetrySnapshot) -> Result<(), Error> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(data_dir: &Path) -> Config {
    let mut config = Config::new();
    config.system.data_dir = data_dir.to_owned();
    config.detectors.dns_log = data_dir.join("dnsmasq.log");
    config.detectors.ids_eve_log = data_dir.join("eve.json");
    config.detectors.ids_fast_log = data_dir.join("fast.log");
    config.detectors.conntrack_path = data_dir.join("nf_conntrack");
    config
}

fn services(config: &Config, clock: Arc<ManualClock>, classifier: Arc<ConfiguredClassifier>) -> Services {
    Services {
        clock,
        counters: Arc::new(Ramp::default()),
        probe: Arc::new(OneRadio),
        actions: Arc::new(NoActions),
        classifier,
        blocker: Arc::new(AcceptAll),
        connections: Arc::new(NoConnections),
        short_term_repo: Arc::new(JsonFileRepository::new(config.short_term_path())),
        long_term_repo: Arc::new(NoopRepository),
    }
}

#[tokio::test]
async fn telemetry_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let clock = Arc::new(ManualClock::new(1_000.0));
    let classifier = Arc::new(ConfiguredClassifier::new(config.classifier.clone()).unwrap());

    let mut plane = ControlPlane::new(
        config.clone(),
        services(&config, clock.clone(), classifier.clone()),
    )
    .await
    .unwrap();
    plane.restore().await;
    assert!(plane.short_term_window(None, Duration::from_secs(3600)).is_empty());

    plane.start().await;
    assert!(plane.is_running());
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
    plane.stop().await;
    assert!(!plane.is_running());
    assert!(config.short_term_path().exists());

    let recorded = plane.short_term_window(Some("eth0"), Duration::from_secs(3600));
    assert!(!recorded["eth0"].is_empty());
    assert_eq!(plane.roles().get("wlan0"), Some(&Role::Ap));

    let restarted = ControlPlane::new(
        config.clone(),
        services(&config, clock.clone(), classifier),
    )
    .await
    .unwrap();
    restarted.restore().await;
    assert_eq!(
        restarted.short_term_window(Some("eth0"), Duration::from_secs(3600)),
        recorded
    );
}

#[tokio::test]
async fn reload_switches_classifier_and_upstreams() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let clock = Arc::new(ManualClock::new(0.0));
    let classifier = Arc::new(ConfiguredClassifier::new(config.classifier.clone()).unwrap());
    let mut plane = ControlPlane::new(
        config.clone(),
        services(&config, clock, classifier.clone()),
    )
    .await
    .unwrap();
    assert!(!classifier.is_remote());

    let mut reloaded = config.clone();
    reloaded.classifier.api_key = Some("sk-live".into());
    reloaded.interfaces.upstreams = vec![Upstream::new("home", None)];
    plane.reload(reloaded);

    assert!(classifier.is_remote());
    assert_eq!(plane.interfaces().upstreams(), vec![Upstream::new("home", None)]);
    assert_eq!(plane.config().classifier.api_key.as_deref(), Some("sk-live"));
}

#[tokio::test]
async fn manual_operations_reach_the_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let clock = Arc::new(ManualClock::new(0.0));
    let classifier = Arc::new(ConfiguredClassifier::new(config.classifier.clone()).unwrap());
    let plane = ControlPlane::new(config.clone(), services(&config, clock.clone(), classifier))
        .await
        .unwrap();

    let event = plane.analyze("manual", "probe from 10.0.0.5").await;
    assert_eq!(event.severity, Severity::Info);
    assert_eq!(event.action, None);
    assert_eq!(plane.threat_events().len(), 1);

    let ip = plane.block_address("10.0.0.6").await.unwrap();
    assert_eq!(plane.blocklist(), vec![ip]);
    assert!(config.blocklist_path().exists());

    assert!(matches!(
        plane.assign_role("wlan0", "AP").await,
        Err(Error::Validation(_))
    ));
    plane.interfaces().tick().await.unwrap();
    plane.assign_role("wlan0", "WAN").await.unwrap();
    assert_eq!(plane.interface_status()[0].role, Some(Role::Wan));

    plane.dns().record("example.org".into(), "192.168.4.20".parse().unwrap());
    clock.advance(Duration::from_secs(1));
    assert_eq!(plane.dns_recent(10).len(), 1);
    assert_eq!(plane.dns_new_domains(Duration::from_secs(60))[0].1, "example.org");
    assert_eq!(
        plane.dns_top_by_client(Duration::from_secs(60), 5)[&"192.168.4.20".parse::<IpAddr>().unwrap()],
        vec![("example.org".to_string(), 1)]
    );
    assert_eq!(plane.dns_by_client(Duration::from_secs(60)).len(), 1);
    assert!(plane.activity_snapshot().is_empty());
    assert_eq!(clock.now(), 1.0);
    assert!(plane.long_term_window(None, Duration::from_secs(60)).is_empty());
}

#[tokio::test]
async fn zero_autosave_interval_never_saves_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.telemetry.autosave_interval = Duration::ZERO;
    config.persistence.save_on_shutdown = false;
    let clock = Arc::new(ManualClock::new(0.0));
    let classifier = Arc::new(ConfiguredClassifier::new(config.classifier.clone()).unwrap());
    let repo = Arc::new(CountingRepository::default());
    let mut services = services(&config, clock, classifier);
    services.short_term_repo = repo.clone();

    let mut plane = ControlPlane::new(config, services).await.unwrap();
    plane.start().await;
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
    plane.stop().await;

    assert_eq!(repo.saves.load(Ordering::SeqCst), 0);
}
