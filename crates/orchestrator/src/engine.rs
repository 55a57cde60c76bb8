#![forbid(unsafe_code)]

use crate::clock::{Clock, SystemClock};
use crate::detectors::{
    ActivityMonitor, AlertFeed, ClientActivity, ConnectionSource, DnsMonitor, DnsObservation,
    EventSink, FlowMonitor, FlowRules, IntrusionMonitor, SystemConnections,
};
use crate::error::Error;
use crate::interfaces::{
    InterfaceOrchestrator, InterfaceProbe, InterfaceRecord, NetworkActions, Role,
    SystemNetworkActions, SystemProbe,
};
use crate::persistence::{JsonFileRepository, SnapshotRepository};
use crate::tasks::{BackgroundTasks, pause};
use crate::telemetry::{
    CounterSource, LongTermRollup, ProcNetDev, Sample, TrafficSampler, WindowedStore,
};
use crate::threats::{
    Blocker, Blocklist, Classifier, ConfiguredClassifier, FirewallBlocker, ThreatEvent,
    ThreatPipeline,
};
use config::Config;
use humansize::{DECIMAL, format_size};
use kernel::{CommandRunner, SystemCommandRunner};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External collaborators of the control plane.
pub struct Services {
    pub clock: Arc<dyn Clock>,
    pub counters: Arc<dyn CounterSource>,
    pub probe: Arc<dyn InterfaceProbe>,
    pub actions: Arc<dyn NetworkActions>,
    pub classifier: Arc<dyn Classifier>,
    pub blocker: Arc<dyn Blocker>,
    pub connections: Arc<dyn ConnectionSource>,
    pub short_term_repo: Arc<dyn SnapshotRepository>,
    pub long_term_repo: Arc<dyn SnapshotRepository>,
}

impl Services {
    /// Collaborators backed by the real host.
    pub fn system(config: &Config) -> Result<Self, Error> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        Ok(Self {
            clock: Arc::new(SystemClock),
            counters: Arc::new(ProcNetDev),
            probe: Arc::new(SystemProbe::new(
                Arc::clone(&runner),
                &config.system.sys_class_net,
            )),
            actions: Arc::new(SystemNetworkActions::new(
                Arc::clone(&runner),
                &config.interfaces.apply_script,
                &config.interfaces.router_config,
            )),
            classifier: Arc::new(ConfiguredClassifier::new(config.classifier.clone())?),
            blocker: Arc::new(FirewallBlocker::new(
                Arc::clone(&runner),
                &config.threats.block_script,
            )),
            connections: Arc::new(SystemConnections::new(runner)),
            short_term_repo: Arc::new(JsonFileRepository::new(config.short_term_path())),
            long_term_repo: Arc::new(JsonFileRepository::new(config.long_term_path())),
        })
    }
}

/// Every core service, created once and shared with whoever needs it.
pub struct ControlPlane {
    config: Config,
    services: Services,
    short_term: Arc<WindowedStore>,
    long_term: Arc<WindowedStore>,
    interfaces: Arc<InterfaceOrchestrator>,
    threats: Arc<ThreatPipeline>,
    dns: Arc<DnsMonitor>,
    activity: Arc<ActivityMonitor>,
    tasks: Option<BackgroundTasks>,
}

impl ControlPlane {
    /// Build the service graph with empty telemetry. No background task runs
    /// until [`ControlPlane::start`].
    pub async fn new(config: Config, services: Services) -> Result<Self, Error> {
        let telemetry = &config.telemetry;
        let short_term = Arc::new(WindowedStore::new(
            "short-term",
            telemetry.short_term_retention,
            telemetry.short_term_capacity,
        ));
        let long_term = Arc::new(WindowedStore::new(
            "long-term",
            telemetry.long_term_retention,
            telemetry.long_term_capacity,
        ));

        let interfaces = Arc::new(InterfaceOrchestrator::new(
            Arc::clone(&services.probe),
            Arc::clone(&services.actions),
            Arc::clone(&services.clock),
            config.interfaces.poll_interval,
            config.interfaces.upstreams.clone(),
        ));

        let blocklist = Blocklist::load(config.blocklist_path()).await;
        let threats = Arc::new(ThreatPipeline::new(
            Arc::clone(&services.classifier),
            Arc::clone(&services.blocker),
            blocklist,
            config.threats.ledger_capacity,
        )?);

        let dns = Arc::new(DnsMonitor::new(
            Arc::clone(&services.clock),
            config.detectors.dns_capacity,
        )?);
        let activity = Arc::new(ActivityMonitor::new(
            Arc::clone(&dns),
            Arc::clone(&services.clock),
            &config.detectors,
        ));

        Ok(Self {
            config,
            services,
            short_term,
            long_term,
            interfaces,
            threats,
            dns,
            activity,
            tasks: None,
        })
    }

    /// Load both telemetry stores. Anything unreadable starts empty.
    pub async fn restore(&self) {
        for (store, repo) in self.stores() {
            match repo.load().await {
                Ok(snapshot) => {
                    store.restore(snapshot);
                    info!(store = store.name(), samples = store.len(), "telemetry restored");
                }
                Err(err) => warn!(store = store.name(), %err, "telemetry snapshot unreadable, starting empty"),
            }
        }
    }

    /// Spawn every background loop. Calling it again while running is a no-op.
    pub async fn start(&mut self) {
        if self.tasks.is_some() {
            debug!("control plane already running");
            return;
        }
        let mut tasks = BackgroundTasks::new();
        let clock = Arc::clone(&self.services.clock);
        let telemetry = &self.config.telemetry;
        let detectors = &self.config.detectors;

        let sampler = TrafficSampler::new(
            Arc::clone(&self.services.counters),
            Arc::clone(&self.short_term),
            Arc::clone(&clock),
            telemetry.sample_interval,
        );
        tasks.spawn("traffic sampler", sampler.run(tasks.token()));

        let rollup = LongTermRollup::new(
            Arc::clone(&self.short_term),
            Arc::clone(&self.long_term),
            Arc::clone(&self.services.long_term_repo),
            Arc::clone(&clock),
            telemetry.rollup_interval,
        );
        tasks.spawn("long-term rollup", rollup.run(tasks.token()));

        if telemetry.autosave_interval.is_zero() {
            debug!("periodic telemetry saves disabled");
        } else {
            tasks.spawn(
                "telemetry autosave",
                autosave(
                    self.stores(),
                    Arc::clone(&clock),
                    telemetry.autosave_interval,
                    tasks.token(),
                ),
            );
        }

        tasks.spawn(
            "interface roles",
            Arc::clone(&self.interfaces).run(tasks.token()),
        );

        let sink: Arc<dyn EventSink> = self.threats.clone();
        let flow = FlowMonitor::new(
            Arc::clone(&self.services.connections),
            Arc::clone(&sink),
            Arc::clone(&clock),
            FlowRules::from(detectors),
            detectors.flow_interval,
        );
        tasks.spawn("flow monitor", flow.run(tasks.token()));

        tasks.spawn(
            "activity monitor",
            Arc::clone(&self.activity).run(tasks.token()),
        );

        let dns = Arc::clone(&self.dns);
        let dns_log = detectors.dns_log.clone();
        let poll = detectors.tail_poll_interval;
        let cancel = tasks.token();
        tasks.spawn("dns monitor", async move {
            dns.run(&dns_log, poll, cancel).await;
        });

        match AlertFeed::select(&detectors.ids_eve_log, &detectors.ids_fast_log).await {
            Some(feed) => {
                let monitor = IntrusionMonitor::new(sink, feed);
                tasks.spawn(
                    "intrusion monitor",
                    monitor.run(Arc::clone(&clock), poll, tasks.token()),
                );
            }
            None => info!("no IDS alert log present, intrusion monitor disabled"),
        }

        info!(tasks = ?tasks.names(), "control plane started");
        self.tasks = Some(tasks);
    }

    /// Signal every loop to stop, wait for each to finish, then persist
    /// telemetry if configured to.
    pub async fn stop(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            tasks.stop().await;
            info!("background tasks stopped");
        }
        if self.config.persistence.save_on_shutdown
            && let Err(err) = self.save().await
        {
            warn!(%err, "failed to save telemetry on shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }

    /// Persist both telemetry stores.
    pub async fn save(&self) -> Result<(), Error> {
        for (store, repo) in self.stores() {
            repo.save(&store.snapshot()).await?;
        }
        Ok(())
    }

    /// Apply reloadable settings: classifier settings and upstream networks.
    /// Everything else takes effect on restart.
    pub fn reload(&mut self, config: Config) {
        self.services.classifier.reconfigure(&config.classifier);
        self.interfaces
            .set_upstreams(config.interfaces.upstreams.clone());
        info!(
            upstreams = config.interfaces.upstreams.len(),
            remote_classifier = config.classifier.credential().is_some(),
            "configuration reloaded"
        );
        self.config.classifier = config.classifier;
        self.config.interfaces.upstreams = config.interfaces.upstreams;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dump_info(&self) {
        let span = tracing::info_span!("state dump");
        let _enter = span.enter();
        info!(roles = ?self.interfaces.roles(), "interfaces");
        info!(
            events = self.threats.len(),
            blocked = self.threats.blocklist().len(),
            "threat ledger"
        );
        let now = self.services.clock.now();
        let latest = self
            .short_term
            .window(now, None, Duration::from_secs(5));
        for (key, samples) in &latest {
            if let Some(sample) = samples.last() {
                info!(
                    iface = %key,
                    rx = %format!("{}/s", format_size(sample.rx as u64, DECIMAL)),
                    tx = %format!("{}/s", format_size(sample.tx as u64, DECIMAL)),
                    "traffic"
                );
            }
        }
        info!(
            short_term = self.short_term.len(),
            long_term = self.long_term.len(),
            dns = self.dns.len(),
            clients = self.activity.snapshot().len(),
            running = self.is_running(),
            "telemetry"
        );
    }

    /// Interfaces from the latest scan.
    pub fn interface_status(&self) -> Vec<InterfaceRecord> {
        self.interfaces.status()
    }

    pub fn roles(&self) -> BTreeMap<String, Role> {
        self.interfaces.roles()
    }

    pub async fn assign_role(&self, name: &str, role: &str) -> Result<(), Error> {
        self.interfaces.assign_role(name, role).await
    }

    pub fn short_term_window(
        &self,
        key: Option<&str>,
        window: Duration,
    ) -> BTreeMap<String, Vec<Sample>> {
        self.short_term
            .window(self.services.clock.now(), key, window)
    }

    pub fn long_term_window(
        &self,
        key: Option<&str>,
        window: Duration,
    ) -> BTreeMap<String, Vec<Sample>> {
        self.long_term
            .window(self.services.clock.now(), key, window)
    }

    pub fn threat_events(&self) -> Vec<ThreatEvent> {
        self.threats.list_events()
    }

    pub async fn analyze(&self, source: &str, message: &str) -> ThreatEvent {
        self.threats.analyze(source, message).await
    }

    pub async fn block_address(&self, address: &str) -> Result<IpAddr, Error> {
        self.threats.block_address(address).await
    }

    pub fn blocklist(&self) -> Vec<IpAddr> {
        self.threats.blocklist()
    }

    pub fn dns_recent(&self, limit: usize) -> Vec<DnsObservation> {
        self.dns.recent(limit)
    }

    pub fn dns_by_client(&self, window: Duration) -> BTreeMap<IpAddr, Vec<(String, f64)>> {
        self.dns.by_client(window)
    }

    pub fn dns_top_by_client(
        &self,
        window: Duration,
        limit: usize,
    ) -> BTreeMap<IpAddr, Vec<(String, usize)>> {
        self.dns.top_by_client(window, limit)
    }

    pub fn dns_new_domains(&self, window: Duration) -> Vec<(f64, String)> {
        self.dns.new_domains(window)
    }

    pub fn activity_snapshot(&self) -> Vec<ClientActivity> {
        self.activity.snapshot()
    }

    pub fn interfaces(&self) -> &Arc<InterfaceOrchestrator> {
        &self.interfaces
    }

    pub fn threats(&self) -> &Arc<ThreatPipeline> {
        &self.threats
    }

    pub fn dns(&self) -> &Arc<DnsMonitor> {
        &self.dns
    }

    pub fn activity(&self) -> &Arc<ActivityMonitor> {
        &self.activity
    }

    fn stores(&self) -> Vec<(Arc<WindowedStore>, Arc<dyn SnapshotRepository>)> {
        vec![
            (
                Arc::clone(&self.short_term),
                Arc::clone(&self.services.short_term_repo),
            ),
            (
                Arc::clone(&self.long_term),
                Arc::clone(&self.services.long_term_repo),
            ),
        ]
    }
}

async fn autosave(
    stores: Vec<(Arc<WindowedStore>, Arc<dyn SnapshotRepository>)>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        if !pause(clock.as_ref(), &cancel, interval).await {
            break;
        }
        for (store, repo) in &stores {
            if let Err(err) = repo.save(&store.snapshot()).await {
                warn!(store = store.name(), %err, "autosave failed");
            }
        }
    }
}
