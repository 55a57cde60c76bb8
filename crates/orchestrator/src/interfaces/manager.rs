#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::error::Error;
use crate::interfaces::{InterfaceProbe, InterfaceRecord, NetworkActions, Role};
use crate::tasks::pause;
use config::Upstream;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of evaluating one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Nothing to change this tick.
    Idle,
    /// Assign these roles, in order.
    Assign(Vec<(String, Role)>),
    /// The single wireless interface is unassigned; WAN if a configured
    /// upstream is visible, AP otherwise.
    CheckUpstreams(String),
}

/// Role decision for one scan, given the interface carrying the default route.
pub fn decide(interfaces: &[InterfaceRecord], default_route: Option<&str>) -> Plan {
    let wireless: Vec<&InterfaceRecord> = interfaces.iter().filter(|i| i.is_wireless).collect();
    match wireless.as_slice() {
        [] => Plan::Idle,
        [radio] => {
            let wired_uplink = default_route.is_some_and(|route| {
                route != radio.name
                    && !interfaces
                        .iter()
                        .any(|i| i.name == route && i.is_wireless)
            });
            if wired_uplink {
                if radio.role == Some(Role::Ap) {
                    Plan::Idle
                } else {
                    Plan::Assign(vec![(radio.name.clone(), Role::Ap)])
                }
            } else if radio.role.is_none() {
                Plan::CheckUpstreams(radio.name.clone())
            } else {
                Plan::Idle
            }
        }
        radios => {
            let chosen_wan = radios
                .iter()
                .find(|i| Some(i.name.as_str()) == default_route)
                .unwrap_or(&radios[0])
                .name
                .clone();
            let mut assign = Vec::new();
            if !radios.iter().any(|i| i.role == Some(Role::Wan)) {
                assign.push((chosen_wan.clone(), Role::Wan));
            }
            if !radios.iter().any(|i| i.role == Some(Role::Ap))
                && let Some(ap) = radios
                    .iter()
                    .find(|i| i.name != chosen_wan && i.role != Some(Role::Wan))
            {
                assign.push((ap.name.clone(), Role::Ap));
            }
            if assign.is_empty() {
                Plan::Idle
            } else {
                Plan::Assign(assign)
            }
        }
    }
}

#[derive(Debug, Default)]
struct RoleState {
    interfaces: Vec<InterfaceRecord>,
    roles: HashMap<String, Role>,
    /// Interfaces the AP stack has been applied for. Never cleared on failure.
    ap_applied: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Scan,
    Manual,
}

/// Owns the interface inventory and the role table.
pub struct InterfaceOrchestrator {
    probe: Arc<dyn InterfaceProbe>,
    actions: Arc<dyn NetworkActions>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    upstreams: RwLock<Vec<Upstream>>,
    state: Mutex<RoleState>,
}

impl InterfaceOrchestrator {
    pub fn new(
        probe: Arc<dyn InterfaceProbe>,
        actions: Arc<dyn NetworkActions>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        upstreams: Vec<Upstream>,
    ) -> Self {
        Self {
            probe,
            actions,
            clock,
            poll_interval,
            upstreams: RwLock::new(upstreams),
            state: Mutex::new(RoleState::default()),
        }
    }

    /// Scan once and apply whatever the scan calls for.
    pub async fn tick(&self) -> Result<Plan, Error> {
        let links = self.probe.links().await?;
        let default_route = match self.probe.default_route().await {
            Ok(route) => route,
            Err(err) => {
                debug!(%err, "default route lookup failed");
                None
            }
        };

        let records = {
            let mut state = self.state.lock();
            let records: Vec<InterfaceRecord> = links
                .into_iter()
                .map(|link| {
                    let role = state.roles.get(&link.name).copied();
                    InterfaceRecord::from_link(link, role)
                })
                .collect();
            state.interfaces = records.clone();
            records
        };

        let plan = decide(&records, default_route.as_deref());
        let assignments = match &plan {
            Plan::Idle => Vec::new(),
            Plan::Assign(assign) => assign.clone(),
            Plan::CheckUpstreams(name) => {
                let role = if self.upstream_visible().await {
                    Role::Wan
                } else {
                    Role::Ap
                };
                vec![(name.clone(), role)]
            }
        };
        for (name, role) in assignments {
            self.commit(&name, role, Origin::Scan).await?;
        }
        Ok(plan)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(err) = self.tick().await {
                warn!(%err, "interface scan failed");
            }
            if !pause(self.clock.as_ref(), &cancel, self.poll_interval).await {
                break;
            }
        }
    }

    /// Manually assign `role` to a known interface.
    ///
    /// Does not check whether another interface already holds the role.
    /// Assigning AP re-arms the apply step even if it ran before.
    pub async fn assign_role(&self, name: &str, role: &str) -> Result<(), Error> {
        {
            let state = self.state.lock();
            if !state.interfaces.iter().any(|i| i.name == name) {
                return Err(Error::Validation(format!("unknown interface: {name}")));
            }
        }
        let role: Role = role.parse()?;
        self.commit(name, role, Origin::Manual).await
    }

    /// Interfaces from the latest scan, with their roles.
    pub fn status(&self) -> Vec<InterfaceRecord> {
        self.state.lock().interfaces.clone()
    }

    pub fn roles(&self) -> BTreeMap<String, Role> {
        self.state
            .lock()
            .roles
            .iter()
            .map(|(name, role)| (name.clone(), *role))
            .collect()
    }

    pub fn upstreams(&self) -> Vec<Upstream> {
        self.upstreams.read().clone()
    }

    pub fn set_upstreams(&self, upstreams: Vec<Upstream>) {
        *self.upstreams.write() = upstreams;
    }

    async fn commit(&self, name: &str, role: Role, origin: Origin) -> Result<(), Error> {
        let apply_ap = {
            let mut state = self.state.lock();
            let Some(index) = state.interfaces.iter().position(|i| i.name == name) else {
                return Err(Error::Validation(format!("unknown interface: {name}")));
            };
            if origin == Origin::Manual
                && state
                    .roles
                    .iter()
                    .any(|(other, held)| other != name && *held == role)
            {
                warn!(iface = %name, %role, "role already held by another interface");
            }
            state.interfaces[index].role = Some(role);
            state.roles.insert(name.to_owned(), role);
            if origin == Origin::Manual {
                state.ap_applied.remove(name);
            }
            role == Role::Ap && state.ap_applied.insert(name.to_owned())
        };
        info!(iface = %name, %role, ?origin, "role assigned");

        match role {
            Role::Wan => self.join_upstreams(name).await,
            Role::Ap if apply_ap => {
                if let Err(err) = self.actions.apply_network_config(name).await {
                    warn!(iface = %name, %err, "access point apply failed");
                }
            }
            Role::Ap => debug!(iface = %name, "access point already applied"),
        }
        Ok(())
    }

    async fn join_upstreams(&self, iface: &str) {
        let upstreams = self.upstreams();
        for upstream in &upstreams {
            match self.actions.join_upstream(iface, upstream).await {
                Ok(()) => {
                    info!(%iface, ssid = %upstream.ssid, "attempted upstream join");
                    return;
                }
                Err(err) => warn!(%iface, ssid = %upstream.ssid, %err, "upstream join failed"),
            }
        }
    }

    async fn upstream_visible(&self) -> bool {
        let upstreams = self.upstreams();
        if upstreams.is_empty() {
            return false;
        }
        match self.probe.visible_networks().await {
            Ok(visible) => upstreams.iter().any(|u| visible.contains(&u.ssid)),
            Err(err) => {
                warn!(%err, "wireless scan failed");
                false
            }
        }
    }
}
