use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Cooperative cancellation token backed by an `AtomicBool`.
///
/// A token made with [`CancelToken::child`] also observes its parent, so
/// one engine command can be stopped without cancelling its siblings.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }
}

/// Failure of a single container-engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("{operation} failed: {message}")]
    CommandFailed {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{0} cancelled")]
    Cancelled(&'static str),

    #[error("reading pull output failed: {0}")]
    Stream(#[from] std::io::Error),
}

/// Opaque identifier of a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// What `inspect` reports about a started container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    pub network_address: String,
}

type Completion = Box<dyn FnOnce() -> Result<(), EngineError> + Send>;

/// Progress output of an image pull.
///
/// The reader yields line-delimited progress text. Once it is exhausted,
/// [`PullStream::complete`] reports whether the pull itself succeeded; a
/// pull can stream perfectly readable output and still fail.
pub struct PullStream {
    reader: Box<dyn Read + Send>,
    completion: Completion,
    abort: Option<CancelToken>,
}

impl PullStream {
    pub fn new<R, F>(reader: R, completion: F) -> Self
    where
        R: Read + Send + 'static,
        F: FnOnce() -> Result<(), EngineError> + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            completion: Box::new(completion),
            abort: None,
        }
    }

    /// Attach the token that stops the underlying pull when its output is
    /// abandoned.
    pub fn with_abort(mut self, abort: CancelToken) -> Self {
        self.abort = Some(abort);
        self
    }

    /// A stream whose pull is successful as soon as the reader is drained.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(reader, || Ok(()))
    }

    pub fn into_parts(self) -> (Box<dyn Read + Send>, PullCompletion) {
        let completion = PullCompletion {
            finish: self.completion,
            abort: self.abort,
        };
        (self.reader, completion)
    }
}

/// Deferred pull status, split off a [`PullStream`] so the reader can be
/// moved onto a relay thread.
pub struct PullCompletion {
    finish: Completion,
    abort: Option<CancelToken>,
}

impl PullCompletion {
    pub fn complete(self) -> Result<(), EngineError> {
        (self.finish)()
    }

    /// Stop a pull whose output is no longer read, then wait for it.
    pub fn abort(self) {
        if let Some(abort) = &self.abort {
            abort.cancel();
        }
        if let Err(e) = (self.finish)() {
            log::debug!("aborted pull ended with: {e}");
        }
    }
}

/// Describes one invocation of the engine CLI. `args` is the full argument
/// list passed to the binary.
#[derive(Debug, Clone)]
pub struct ContainerCommand {
    pub binary: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Outcome of one engine CLI invocation.
#[derive(Debug, Default)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub cancelled: bool,
    pub timed_out: bool,
}

impl CommandResult {
    /// Map the raw outcome onto an [`EngineError`], returning trimmed stdout
    /// on success.
    pub fn into_result(
        self,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<String, EngineError> {
        if self.cancelled {
            return Err(EngineError::Cancelled(operation));
        }
        if self.timed_out {
            return Err(EngineError::Timeout { operation, timeout });
        }
        if self.success {
            return Ok(self.stdout.trim().to_string());
        }
        Err(classify_failure(operation, self.exit_code, &self.stderr))
    }
}

fn classify_failure(
    operation: &'static str,
    exit_code: Option<i32>,
    stderr: &str,
) -> EngineError {
    let message = match stderr.trim() {
        "" => match exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        },
        text => text.to_string(),
    };
    let lower = message.to_ascii_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
    {
        EngineError::Unavailable(message)
    } else if lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("not found: manifest")
        || (lower.contains("no such image") && operation != "inspect")
    {
        EngineError::ImageNotFound(message)
    } else {
        EngineError::CommandFailed { operation, message }
    }
}
