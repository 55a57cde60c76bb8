#![forbid(unsafe_code)]

use crate::error::Error;
use async_trait::async_trait;
use kernel::CommandRunner;
use kernel::command::args;
use kernel::link::{self, Link};
use std::path::PathBuf;
use std::sync::Arc;

/// Read-only view of the host's interfaces and radio environment.
#[async_trait]
pub trait InterfaceProbe: Send + Sync {
    /// Every non-loopback interface, in the order the host lists them.
    async fn links(&self) -> Result<Vec<Link>, Error>;
    /// Interface carrying the default route, if any.
    async fn default_route(&self) -> Result<Option<String>, Error>;
    /// SSIDs currently visible to any radio.
    async fn visible_networks(&self) -> Result<Vec<String>, Error>;
}

/// Probe backed by `ip`, sysfs and `nmcli`.
pub struct SystemProbe {
    runner: Arc<dyn CommandRunner>,
    sys_class_net: PathBuf,
}

impl SystemProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, sys_class_net: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            sys_class_net: sys_class_net.into(),
        }
    }

    async fn stdout(&self, program: &str, argv: &[&str]) -> Result<String, Error> {
        let output = self.runner.run(program, &args(argv)).await?;
        Ok(output.into_stdout(program)?)
    }
}

#[async_trait]
impl InterfaceProbe for SystemProbe {
    async fn links(&self) -> Result<Vec<Link>, Error> {
        let json = self.stdout("ip", &["-j", "addr"]).await?;
        let root = self.sys_class_net.clone();
        Ok(link::parse_ip_addr_json(&json, |name| {
            link::is_wireless(&root, name)
        })?)
    }

    async fn default_route(&self) -> Result<Option<String>, Error> {
        let out = self.stdout("ip", &["route", "show", "default"]).await?;
        Ok(link::parse_default_route(&out))
    }

    async fn visible_networks(&self) -> Result<Vec<String>, Error> {
        let out = self
            .stdout("nmcli", &["-t", "-f", "SSID", "device", "wifi", "list"])
            .await?;
        Ok(link::parse_ssid_list(&out))
    }
}
