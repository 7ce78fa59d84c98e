//! The operations exposed to callers: submit a build and query results.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::build::{BuildContext, BuildRecord, Command, DispatchError, WorkerPool};
use crate::config::Config;
use crate::docker::{CancelToken, ContainerEngine};
use crate::registry::{Registry, RegistryError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Source of build identifiers. Must never hand out the same id twice.
pub trait IdSupplier: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random UUID v4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSupplier;

impl IdSupplier for UuidSupplier {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("build {id} did not finish within {timeout:?}")]
    WaitTimeout { id: String, timeout: Duration },

    #[error("build service is shut down")]
    ShutDown,

    #[error("failed to start build worker: {0}")]
    Spawn(#[source] io::Error),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::NotFound(_)))
    }
}

impl From<DispatchError> for ServiceError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Closed => Self::ShutDown,
            DispatchError::Spawn(e) => Self::Spawn(e),
        }
    }
}

/// Tunables for a [`BuildService`].
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub max_concurrent_builds: usize,
    pub pull_timeout: Duration,
}

impl ServiceSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_concurrent_builds: cfg.max_concurrent_builds.resolve(),
            pull_timeout: Duration::from_secs(cfg.pull_timeout),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct BuildService {
    registry: Arc<Registry>,
    cancel: CancelToken,
    pool: WorkerPool,
    ids: Box<dyn IdSupplier>,
}

impl BuildService {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: ServiceSettings) -> Self {
        Self::with_ids(engine, settings, Box::new(UuidSupplier))
    }

    pub fn with_ids(
        engine: Arc<dyn ContainerEngine>,
        settings: ServiceSettings,
        ids: Box<dyn IdSupplier>,
    ) -> Self {
        let ctx = BuildContext {
            registry: Arc::new(Registry::new()),
            engine,
            cancel: CancelToken::new(),
            pull_timeout: settings.pull_timeout,
        };
        Self {
            registry: Arc::clone(&ctx.registry),
            cancel: ctx.cancel.clone(),
            pool: WorkerPool::new(ctx, settings.max_concurrent_builds),
            ids,
        }
    }

    /// Register a new build and queue it for execution.
    ///
    /// Returns the pending record immediately; execution outcomes are only
    /// observable through later queries. Builds wait in `Submitted` while
    /// every worker is busy.
    pub fn submit(
        &self,
        image_reference: &str,
        project_id: &str,
        tasks: Vec<Command>,
    ) -> Result<BuildRecord, ServiceError> {
        if self.is_shut_down() {
            return Err(ServiceError::ShutDown);
        }

        let record =
            BuildRecord::submitted(self.ids.next_id(), image_reference, project_id, tasks);
        self.registry.append(record.clone())?;
        log::debug!(
            "[{}] submitted {} for project {}",
            record.id,
            record.image_reference,
            record.project_id
        );

        if let Err(e) = self.pool.dispatch(record.clone()) {
            log::error!("[{}] could not queue build: {e}", record.id);
            let mut rejected = record;
            rejected.fail(&e);
            if let Err(e) = self.registry.replace_by_id(rejected) {
                log::error!("could not publish rejected build: {e}");
            }
            return Err(e.into());
        }
        Ok(record)
    }

    pub fn list_all(&self) -> Vec<BuildRecord> {
        self.registry.snapshot_all()
    }

    pub fn list_by_project(&self, project_id: &str) -> Vec<BuildRecord> {
        self.registry.snapshot_by_project(project_id)
    }

    pub fn get_by_id(&self, id: &str) -> Result<BuildRecord, ServiceError> {
        Ok(self.registry.snapshot_by_id(id)?)
    }

    /// Poll until the build reaches a terminal state.
    pub fn wait_until_finished(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<BuildRecord, ServiceError> {
        let start = Instant::now();
        loop {
            let record = self.get_by_id(id)?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            if start.elapsed() > timeout {
                return Err(ServiceError::WaitTimeout {
                    id: id.to_string(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Refuse new builds, kill in-flight engine commands and wait for the
    /// workers to exit. Builds still queued fail as cancelled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pool.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
