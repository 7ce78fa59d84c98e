//! Drives one build from submission to a terminal state.
//!
//! The executor owns a private working copy of its record and publishes
//! every change through [`Registry::replace_by_id`]. While the image is
//! pulling, ownership of the working copy moves to a recorder thread that
//! drains the pull-output relay and publishes each line; the executor takes
//! the copy back once the stream closes, so log capture always completes
//! before the container is created.

use std::io::{self, Read};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use crate::build::types::{BuildRecord, BuildState};
use crate::docker::{CancelToken, ContainerEngine, EngineError};
use crate::registry::{Registry, RegistryError};
use crate::relay::{self, Relay};

/// Why a build stopped short of `Done`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to start {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("pull output recorder panicked")]
    RecorderPanicked,
}

/// Everything an executor needs, shared by all builds of a service.
#[derive(Clone)]
pub struct BuildContext {
    pub registry: Arc<Registry>,
    pub engine: Arc<dyn ContainerEngine>,
    pub cancel: CancelToken,
    /// Upper bound on how long the pull output may take to close.
    pub pull_timeout: Duration,
}

/// Run a build to completion on the calling thread.
///
/// Engine failures never escape: they move the record to `Failed` with the
/// reason appended to its logs. A build that starts after `ctx.cancel` was
/// tripped fails as cancelled without touching the engine.
pub fn execute(ctx: &BuildContext, mut record: BuildRecord) -> BuildRecord {
    match drive(ctx, &mut record) {
        Ok(()) => {
            log::info!(
                "[{}] build finished, address {:?}",
                record.id,
                record.address
            );
        }
        Err(error) => {
            log::warn!("[{}] build failed: {error}", record.id);
            record.fail(&error);
            if let Err(e) = ctx.registry.replace_by_id(record.clone()) {
                log::error!("[{}] could not publish failure: {e}", record.id);
            }
        }
    }
    record
}

fn drive(ctx: &BuildContext, record: &mut BuildRecord) -> Result<(), ExecutionError> {
    checkpoint(ctx, "build")?;
    advance(ctx, record, BuildState::Pulling)?;
    let stream = ctx.engine.pull_image(&record.image_reference, &ctx.cancel)?;
    let (reader, completion) = stream.into_parts();

    if let Err(error) = capture_pull_output(ctx, record, reader) {
        completion.abort();
        return Err(error);
    }
    completion.complete()?;
    advance(ctx, record, BuildState::LogCaptured)?;

    checkpoint(ctx, "create")?;
    advance(ctx, record, BuildState::ContainerStarting)?;
    let handle = ctx
        .engine
        .create_container(&record.image_reference, &ctx.cancel)?;
    checkpoint(ctx, "start")?;
    ctx.engine.start_container(&handle, &ctx.cancel)?;

    checkpoint(ctx, "inspect")?;
    advance(ctx, record, BuildState::Running)?;
    let inspection = ctx.engine.inspect_container(&handle, &ctx.cancel)?;

    record.finish(inspection.network_address);
    ctx.registry.replace_by_id(record.clone())?;
    Ok(())
}

/// Engines are not required to poll the token, so check it between calls.
fn checkpoint(ctx: &BuildContext, operation: &'static str) -> Result<(), ExecutionError> {
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled(operation).into());
    }
    Ok(())
}

fn advance(
    ctx: &BuildContext,
    record: &mut BuildRecord,
    state: BuildState,
) -> Result<(), ExecutionError> {
    log::debug!("[{}] {} -> {}", record.id, record.state, state);
    record.state = state;
    ctx.registry.replace_by_id(record.clone())?;
    Ok(())
}

/// Relay `reader` and hand the working copy to a recorder until the stream
/// closes. `record` holds every captured line afterwards, even on error.
fn capture_pull_output(
    ctx: &BuildContext,
    record: &mut BuildRecord,
    reader: Box<dyn Read + Send>,
) -> Result<(), ExecutionError> {
    let relay = relay::start_relay(reader).map_err(|source| ExecutionError::Spawn {
        role: "pull relay",
        source,
    })?;

    let id = record.id.clone();
    let registry = Arc::clone(&ctx.registry);
    let working = std::mem::take(record);
    let fallback = working.clone();
    let timeout = ctx.pull_timeout;

    let recorder = std::thread::Builder::new()
        .name(format!("recorder-{id}"))
        .spawn(move || record_pull_output(&registry, working, relay, timeout));
    let recorder = match recorder {
        Ok(handle) => handle,
        Err(source) => {
            *record = fallback;
            return Err(ExecutionError::Spawn {
                role: "pull recorder",
                source,
            });
        }
    };

    match recorder.join() {
        Ok(capture) => {
            *record = capture.record;
            capture.outcome
        }
        Err(_) => {
            // Lines published before the panic are in the registry.
            *record = ctx.registry.snapshot_by_id(&id).unwrap_or(fallback);
            Err(ExecutionError::RecorderPanicked)
        }
    }
}

/// The working copy handed back by the recorder, with how the pull ended.
struct Capture {
    record: BuildRecord,
    outcome: Result<(), ExecutionError>,
}

fn record_pull_output(
    registry: &Registry,
    mut record: BuildRecord,
    relay: Relay,
    timeout: Duration,
) -> Capture {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match relay.messages.recv_timeout(remaining) {
            Ok(line) => {
                log::info!("[{}] {line}", record.id);
                record.logs.push(line);
                if let Err(e) = registry.replace_by_id(record.clone()) {
                    return Capture {
                        record,
                        outcome: Err(e.into()),
                    };
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                return Capture {
                    record,
                    outcome: Err(EngineError::Timeout {
                        operation: "pull",
                        timeout,
                    }
                    .into()),
                };
            }
        }
    }

    let outcome = relay
        .finish()
        .map(|_| ())
        .map_err(|e| EngineError::Stream(e).into());
    Capture { record, outcome }
}
