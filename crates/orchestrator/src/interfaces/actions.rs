#![forbid(unsafe_code)]

use crate::error::Error;
use async_trait::async_trait;
use config::Upstream;
use kernel::CommandRunner;
use kernel::command::is_root;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host changes triggered by role assignment.
#[async_trait]
pub trait NetworkActions: Send + Sync {
    /// Bring up the access-point stack on `iface`.
    async fn apply_network_config(&self, iface: &str) -> Result<(), Error>;
    /// Ask the host to join `upstream` on `iface`. `Ok` means the attempt was
    /// made, not that the association succeeded.
    async fn join_upstream(&self, iface: &str, upstream: &Upstream) -> Result<(), Error>;
}

pub struct SystemNetworkActions {
    runner: Arc<dyn CommandRunner>,
    apply_script: PathBuf,
    router_config: PathBuf,
    privileged: bool,
}

impl SystemNetworkActions {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        apply_script: impl Into<PathBuf>,
        router_config: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            apply_script: apply_script.into(),
            router_config: router_config.into(),
            privileged: is_root(),
        }
    }

    /// Override the detected privilege level.
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    fn apply_command(&self) -> (&'static str, Vec<String>) {
        let script = self.apply_script.display().to_string();
        let config = self.router_config.display().to_string();
        if self.privileged {
            ("/bin/bash", vec![script, config])
        } else {
            (
                "sudo",
                vec!["-n".into(), "/bin/bash".into(), script, config],
            )
        }
    }
}

#[async_trait]
impl NetworkActions for SystemNetworkActions {
    async fn apply_network_config(&self, iface: &str) -> Result<(), Error> {
        let (program, argv) = self.apply_command();
        let output = self.runner.run(program, &argv).await?;
        if !self.privileged && !output.success && output.stderr.to_lowercase().contains("password")
        {
            return Err(Error::Action(format!(
                "sudo requires a password to run {}; configure passwordless sudo for it",
                self.apply_script.display()
            )));
        }
        let stdout = output.into_stdout(program)?;
        debug!(%iface, output = stdout.trim(), "network configuration applied");
        Ok(())
    }

    async fn join_upstream(&self, iface: &str, upstream: &Upstream) -> Result<(), Error> {
        let mut argv: Vec<String> = ["device", "wifi", "connect"]
            .into_iter()
            .map(String::from)
            .collect();
        argv.push(upstream.ssid.clone());
        argv.push("ifname".into());
        argv.push(iface.to_owned());
        if let Some(passphrase) = upstream.passphrase.as_deref().filter(|p| !p.is_empty()) {
            argv.push("password".into());
            argv.push(passphrase.to_owned());
        }

        let output = self.runner.run("nmcli", &argv).await?;
        if !output.success {
            warn!(%iface, ssid = %upstream.ssid, stderr = output.stderr.trim(), "nmcli connect reported failure");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::CommandOutput;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        reply: CommandOutput,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, kernel::Error> {
            self.calls.lock().push((program.to_owned(), args.to_vec()));
            Ok(self.reply.clone())
        }
    }

    fn actions(runner: Arc<Recorder>, privileged: bool) -> SystemNetworkActions {
        SystemNetworkActions::new(runner, "/opt/apply.sh", "/run/router.json")
            .with_privileged(privileged)
    }

    #[tokio::test]
    async fn unprivileged_apply_goes_through_sudo() {
        let runner = Arc::new(Recorder {
            reply: CommandOutput {
                success: true,
                ..Default::default()
            },
            ..Default::default()
        });
        actions(runner.clone(), false)
            .apply_network_config("wlan0")
            .await
            .unwrap();
        assert_eq!(
            runner.calls.lock()[0],
            (
                "sudo".to_string(),
                vec!["-n", "/bin/bash", "/opt/apply.sh", "/run/router.json"]
                    .into_iter()
                    .map(String::from)
                    .collect()
            )
        );
    }

    #[tokio::test]
    async fn sudo_password_prompt_is_an_error() {
        let runner = Arc::new(Recorder {
            reply: CommandOutput {
                stderr: "sudo: a password is required\n".into(),
                success: false,
                code: Some(1),
                ..Default::default()
            },
            ..Default::default()
        });
        let err = actions(runner, false)
            .apply_network_config("wlan0")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Action(_)));
    }

    #[tokio::test]
    async fn join_passes_passphrase_and_ignores_exit_status() {
        let runner = Arc::new(Recorder::default());
        actions(runner.clone(), true)
            .join_upstream("wlan1", &Upstream::new("home", Some("hunter22".into())))
            .await
            .unwrap();
        let calls = runner.calls.lock();
        assert_eq!(calls[0].0, "nmcli");
        assert_eq!(
            calls[0].1,
            ["device", "wifi", "connect", "home", "ifname", "wlan1", "password", "hunter22"]
                .map(String::from)
                .to_vec()
        );
    }
}
