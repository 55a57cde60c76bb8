//! External program execution.
//!
//! Every call runs on tokio's blocking pool so a slow tool never stalls the
//! scheduler threads that drive the background loops.

use crate::Error;
use async_trait::async_trait;
use std::process::{Command, Stdio};
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Stdout of a successful run, or [`Error::CommandFailed`].
    pub fn into_stdout(self, program: &str) -> Result<String, Error> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(Error::CommandFailed {
                program: program.to_owned(),
                code: self.code,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. Only a failure to start the program is an
    /// error; a non-zero exit is reported through [`CommandOutput::success`].
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, Error> {
        let program = program.to_owned();
        let args = args.to_vec();
        trace!(%program, ?args, "running command");

        tokio::task::spawn_blocking(move || {
            let output = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .map_err(|source| Error::CommandSpawnFailed {
                    program: program.clone(),
                    source,
                })?;

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                success: output.status.success(),
                code: output.status.code(),
            })
        })
        .await?
    }
}

/// Convert borrowed arguments into the owned form [`CommandRunner`] takes.
pub fn args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}

/// Whether this process runs with an effective uid of root.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_output_becomes_error() {
        let output = CommandOutput {
            stdout: String::new(),
            stderr: "RTNETLINK answers: Operation not permitted\n".into(),
            success: false,
            code: Some(2),
        };
        let err = output.into_stdout("ip").unwrap_err();
        assert!(matches!(
            err,
            Error::CommandFailed { ref program, code: Some(2), ref stderr }
                if program == "ip" && stderr == "RTNETLINK answers: Operation not permitted"
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let result = SystemCommandRunner
            .run("/nonexistent/routerd-test-binary", &[])
            .await;
        assert!(matches!(result, Err(Error::CommandSpawnFailed { .. })));
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_run() {
        let output = SystemCommandRunner
            .run("sh", &args(&["-c", "printf hello"]))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.into_stdout("sh").unwrap(), "hello");
    }
}
