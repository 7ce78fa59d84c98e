use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use super::run;
use super::types::{
    CancelToken, ContainerCommand, ContainerHandle, EngineError, Inspection, PullStream,
};
use crate::config::Config;

/// The container-engine capabilities a build needs.
///
/// Every call may block; implementations are expected to honour `cancel`
/// and to bound their own duration.
pub trait ContainerEngine: Send + Sync {
    fn pull_image(&self, reference: &str, cancel: &CancelToken) -> Result<PullStream, EngineError>;

    fn create_container(
        &self,
        reference: &str,
        cancel: &CancelToken,
    ) -> Result<ContainerHandle, EngineError>;

    fn start_container(
        &self,
        handle: &ContainerHandle,
        cancel: &CancelToken,
    ) -> Result<(), EngineError>;

    fn inspect_container(
        &self,
        handle: &ContainerHandle,
        cancel: &CancelToken,
    ) -> Result<Inspection, EngineError>;
}

/// [`ContainerEngine`] backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    engine_timeout: Duration,
    pull_timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, engine_timeout: Duration, pull_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            engine_timeout,
            pull_timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.docker_binary.clone(),
            Duration::from_secs(cfg.engine_timeout),
            Duration::from_secs(cfg.pull_timeout),
        )
    }

    /// Verify that the Docker daemon is reachable.
    pub fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| {
                format!("failed to invoke `{}`, is it installed and on PATH?", self.binary)
            })?;

        if !status.success() {
            bail!("docker daemon is not running (exit {})", status);
        }
        Ok(())
    }

    fn command<I, S>(&self, args: I, timeout: Duration) -> ContainerCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ContainerCommand {
            binary: self.binary.clone(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    fn run(
        &self,
        operation: &'static str,
        cmd: ContainerCommand,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        let timeout = cmd.timeout;
        run::run(cmd, cancel.clone())
            .map_err(|e| EngineError::Unavailable(format!("{e:#}")))?
            .into_result(operation, timeout)
    }
}

impl ContainerEngine for DockerCli {
    fn pull_image(&self, reference: &str, cancel: &CancelToken) -> Result<PullStream, EngineError> {
        let timeout = self.pull_timeout;
        // Own token so an abandoned pull can be killed on its own.
        let abort = cancel.child();
        let spawned = run::spawn(self.command(["pull", reference], timeout), abort.clone())
            .map_err(|e| EngineError::Unavailable(format!("{e:#}")))?;

        let run::Spawned { stdout, finished } = spawned;
        let stream = PullStream::new(stdout, move || {
            let result = finished.join().map_err(|_| EngineError::CommandFailed {
                operation: "pull",
                message: "engine supervisor thread panicked".into(),
            })?;
            result.into_result("pull", timeout).map(|_| ())
        });
        Ok(stream.with_abort(abort))
    }

    fn create_container(
        &self,
        reference: &str,
        cancel: &CancelToken,
    ) -> Result<ContainerHandle, EngineError> {
        let cmd = self.command(["create", reference], self.engine_timeout);
        let id = self.run("create", cmd, cancel)?;
        // `docker create` may print pull chatter before the id.
        match id.lines().last().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(ContainerHandle(id.to_string())),
            _ => Err(EngineError::CommandFailed {
                operation: "create",
                message: "engine returned no container id".into(),
            }),
        }
    }

    fn start_container(
        &self,
        handle: &ContainerHandle,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        let cmd = self.command(["start", handle.id()], self.engine_timeout);
        self.run("start", cmd, cancel).map(|_| ())
    }

    fn inspect_container(
        &self,
        handle: &ContainerHandle,
        cancel: &CancelToken,
    ) -> Result<Inspection, EngineError> {
        let cmd = self.command(
            [
                "inspect",
                "--format",
                "{{.NetworkSettings.IPAddress}}",
                handle.id(),
            ],
            self.engine_timeout,
        );
        let network_address = self.run("inspect", cmd, cancel)?;
        Ok(Inspection { network_address })
    }
}
