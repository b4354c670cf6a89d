//! Running the external program behind a tool.
//!
//! The child runs in its own process group with stdin closed. Its stdout and
//! stderr are captured concurrently up to a byte limit; anything beyond the
//! limit is drained and counted so the child never blocks on a full pipe.
//! On timeout or cancellation the group receives SIGTERM, then SIGKILL once
//! the grace period has elapsed. A non-zero exit is reported, not judged.

use std::{
    borrow::Cow,
    process::Stdio,
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// Bytes read from one of the child's output streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    /// At most `max_output_bytes` of the stream.
    pub bytes: Vec<u8>,
    /// Everything the child wrote, including what was dropped.
    pub total_bytes: usize,
    pub truncated: bool,
}

impl Capture {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn is_utf8(&self) -> bool {
        std::str::from_utf8(&self.bytes).is_ok()
    }
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own. `None` when it died from a signal.
    Exited(Option<i32>),
    TimedOut(Duration),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub termination: Termination,
    pub stdout: Capture,
    pub stderr: Capture,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    pub max_output_bytes: usize,
    pub env: Vec<(String, String)>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            grace_period: Duration::from_secs(2),
            max_output_bytes: 4 * 1024 * 1024,
            env: Vec::new(),
        }
    }
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `program` with `args` to completion, timeout or cancellation.
///
/// The child is always reaped before this returns, and if the returned
/// future is dropped early the whole process group is killed.
pub async fn invoke(
    program: &str,
    args: &[String],
    options: &InvokeOptions,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, ToolError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &options.env {
        command.env(key, value);
    }
    #[cfg(unix)]
    command.process_group(0);

    log::debug!("spawning {program} {}", args.join(" "));
    let started = Instant::now();
    let child = command
        .spawn()
        .map_err(|e| ToolError::ProcessSpawnFailure {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    let mut guard = ChildGuard::new(child);
    let stdout = tokio::spawn(capture(guard.child.stdout.take(), options.max_output_bytes));
    let stderr = tokio::spawn(capture(guard.child.stderr.take(), options.max_output_bytes));

    let ending = tokio::select! {
        status = guard.child.wait() => Ending::Exited(status),
        _ = tokio::time::sleep(options.timeout) => Ending::TimedOut,
        _ = cancel.cancelled() => Ending::Cancelled,
    };

    let termination = match ending {
        Ending::Exited(Ok(status)) => Termination::Exited(status.code()),
        Ending::Exited(Err(e)) => {
            log::warn!("failed to wait for {program}: {e}");
            guard.terminate(options.grace_period).await;
            Termination::Exited(None)
        }
        Ending::TimedOut => {
            log::warn!(
                "{program} exceeded its {}s timeout, terminating",
                options.timeout.as_secs_f64()
            );
            guard.terminate(options.grace_period).await;
            Termination::TimedOut(options.timeout)
        }
        Ending::Cancelled => {
            log::info!("{program} cancelled, terminating");
            guard.terminate(options.grace_period).await;
            Termination::Cancelled
        }
    };
    guard.finish();

    let stdout = collect(stdout, options.grace_period, "stdout").await;
    let stderr = collect(stderr, options.grace_period, "stderr").await;

    Ok(ProcessOutcome {
        termination,
        stdout,
        stderr,
        elapsed: started.elapsed(),
    })
}

async fn capture<R>(reader: Option<R>, limit: usize) -> Capture
where
    R: AsyncRead + Unpin,
{
    let mut capture = Capture::default();
    let Some(mut reader) = reader else {
        return capture;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                capture.total_bytes += n;
                let room = limit.saturating_sub(capture.bytes.len());
                capture.bytes.extend_from_slice(&chunk[..n.min(room)]);
                if n > room {
                    capture.truncated = true;
                }
            }
            Err(e) => {
                log::debug!("stopped reading child output: {e}");
                break;
            }
        }
    }
    capture
}

/// Wait for a capture task. A descendant that left the process group can
/// hold the pipe open; in that case the output is abandoned.
async fn collect(mut task: JoinHandle<Capture>, wait: Duration, stream: &str) -> Capture {
    match tokio::time::timeout(wait, &mut task).await {
        Ok(Ok(capture)) => capture,
        Ok(Err(e)) => {
            log::warn!("{stream} capture failed: {e}");
            Capture::default()
        }
        Err(_) => {
            log::warn!("{stream} still open after the process ended, discarding");
            task.abort();
            Capture {
                truncated: true,
                ..Capture::default()
            }
        }
    }
}

/// Owns a spawned child until it has been reaped.
///
/// Dropping the guard before [`ChildGuard::finish`] kills the whole process
/// group, which covers panics and callers dropping the invocation future.
struct ChildGuard {
    child: Child,
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<i32>,
    finished: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        Self {
            child,
            pgid,
            finished: false,
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        if let Some(pgid) = self.pgid {
            // ESRCH only means the group is already gone.
            let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), signal);
        }
    }

    /// SIGTERM, then SIGKILL after `grace`, then reap.
    async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        {
            self.signal_group(nix::sys::signal::Signal::SIGTERM);
            if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
                return;
            }
            log::warn!("process ignored SIGTERM for {}ms, killing", grace.as_millis());
            self.signal_group(nix::sys::signal::Signal::SIGKILL);
        }
        #[cfg(not(unix))]
        let _ = grace;

        if let Err(e) = self.child.kill().await {
            log::debug!("kill failed: {e}");
        }
        let _ = self.child.wait().await;
    }

    /// Mark the child as reaped and sweep any descendants left in its group.
    fn finish(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        self.finished = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        let _ = self.child.start_kill();
    }
}
