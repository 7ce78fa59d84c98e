use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::types::{CancelToken, CommandResult, ContainerCommand};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running engine CLI process whose stdout is handed to the caller.
///
/// A supervisor thread owns the child: it collects stderr, enforces the
/// command's timeout and the cancel token, and yields the final
/// [`CommandResult`] (with an empty `stdout`) once the process is gone.
pub struct Spawned {
    pub stdout: ChildStdout,
    pub finished: JoinHandle<CommandResult>,
}

/// Spawn an engine CLI process and stream its stdout to the caller.
pub fn spawn(cmd: ContainerCommand, cancel: CancelToken) -> Result<Spawned> {
    let mut child = Command::new(&cmd.binary)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn `{}`", cmd.binary))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        anyhow::bail!("`{}` was spawned without piped output", cmd.binary);
    };

    log::debug!("running `{} {}`", cmd.binary, cmd.args.join(" "));

    let stderr_reader = match std::thread::Builder::new()
        .name("engine-stderr".into())
        .spawn(move || collect_stderr(stderr))
    {
        Ok(handle) => handle,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("failed to start stderr reader thread");
        }
    };

    let timeout = cmd.timeout;
    let finished = std::thread::Builder::new()
        .name("engine-supervisor".into())
        .spawn(move || supervise(child, stderr_reader, cancel, timeout))
        .context("failed to start engine supervisor thread")?;

    Ok(Spawned { stdout, finished })
}

/// Run an engine CLI process to completion, capturing stdout.
pub fn run(cmd: ContainerCommand, cancel: CancelToken) -> Result<CommandResult> {
    let Spawned {
        mut stdout,
        finished,
    } = spawn(cmd, cancel)?;

    // Reaches EOF when the process exits or the supervisor kills it.
    let mut captured = String::new();
    let _ = stdout.read_to_string(&mut captured);

    let mut result = join_supervisor(finished);
    result.stdout = captured;
    Ok(result)
}

fn join_supervisor(handle: JoinHandle<CommandResult>) -> CommandResult {
    handle.join().unwrap_or_else(|_| CommandResult {
        stderr: "engine supervisor thread panicked".into(),
        ..CommandResult::default()
    })
}

fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf);
    buf
}

fn supervise(
    mut child: Child,
    stderr_handle: JoinHandle<String>,
    cancel: CancelToken,
    timeout: Duration,
) -> CommandResult {
    // --- poll loop ---------------------------------------------------------
    let start = Instant::now();
    let mut cancelled = false;
    let mut timed_out = false;

    let exit_status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(_) => break None,
        }

        if cancel.is_cancelled() {
            cancelled = true;
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }

        if start.elapsed() > timeout {
            timed_out = true;
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }

        std::thread::sleep(POLL_INTERVAL);
    };

    // --- finalize ----------------------------------------------------------
    let stderr = stderr_handle.join().unwrap_or_default();
    let exit_code = exit_status.and_then(|s| s.code());

    CommandResult {
        success: exit_code == Some(0),
        exit_code,
        stdout: String::new(),
        stderr,
        cancelled,
        timed_out,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> ContainerCommand {
        ContainerCommand {
            binary: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout,
        }
    }

    #[test]
    fn run_captures_stdout_and_exit_code() {
        let result = run(sh("echo hello", Duration::from_secs(5)), CancelToken::new()).unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn run_captures_stderr_on_failure() {
        let result = run(
            sh("echo broken >&2; exit 3", Duration::from_secs(5)),
            CancelToken::new(),
        )
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr.trim(), "broken");
    }

    #[test]
    fn run_kills_process_after_timeout() {
        let result = run(sh("exec sleep 30", Duration::from_millis(200)), CancelToken::new()).unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
    }

    #[test]
    fn cancelled_token_kills_process() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run(sh("exec sleep 30", Duration::from_secs(30)), cancel).unwrap();
        assert!(result.cancelled);
    }

    #[test]
    fn cancelling_a_child_token_kills_only_that_process() {
        let service = CancelToken::new();
        let own = service.child();
        own.cancel();
        let killed = run(sh("exec sleep 30", Duration::from_secs(30)), own).unwrap();
        assert!(killed.cancelled);

        let untouched = run(sh("echo still here", Duration::from_secs(5)), service.child()).unwrap();
        assert!(untouched.success);
        assert_eq!(untouched.stdout.trim(), "still here");
    }

    #[test]
    fn spawn_fails_for_missing_binary() {
        let cmd = ContainerCommand {
            binary: "definitely-not-a-real-binary-4821".into(),
            args: Vec::new(),
            timeout: Duration::from_secs(1),
        };
        assert!(spawn(cmd, CancelToken::new()).is_err());
    }
}
