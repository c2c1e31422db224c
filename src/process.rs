//! Subprocess execution with a wall-clock deadline.
//!
//! The child never gets stdin. Its stdout and stderr are drained on two
//! reader threads for as long as the pipes stay open, so a chatty engine
//! can't block on a full pipe. The calling thread polls for exit and doubles
//! as the supervisor: on timeout or cancellation it kills and reaps the
//! child. On Unix the child leads its own process group and the whole group
//! is killed, so helpers started by a wrapper script die with it. Waiting for
//! the readers after exit is bounded by [`DRAIN_GRACE`].
use crate::error::{OcrError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on diagnostic output kept per stream.
pub const MAX_CAPTURED_BYTES: usize = 64 * 1024;

/// How long the output readers may take to finish once the child is gone.
pub const DRAIN_GRACE: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK: usize = 8 * 1024;
// Longest line logged as-is; anything longer is logged in pieces.
const MAX_LOG_LINE: usize = 4 * 1024;

/// Cooperative cancellation flag shared between a caller and a running job.
///
/// Once cancelled it stays cancelled, so the caller can still observe the
/// request after the job has returned `OcrError::Interrupted`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Completed(ExitStatus),
    TimedOut,
    Interrupted,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub status: WaitStatus,
    pub elapsed: Duration,
    pub timeout: Option<Duration>,
    /// Diagnostic only.
    pub stdout: String,
    /// Diagnostic only.
    pub stderr: String,
}

impl RunOutcome {
    /// Exit status of a completed run. The code itself is not judged here.
    pub fn exit_status(&self) -> Result<ExitStatus> {
        match self.status {
            WaitStatus::Completed(status) => Ok(status),
            WaitStatus::TimedOut => Err(OcrError::Timeout {
                seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
            WaitStatus::Interrupted => Err(OcrError::Interrupted),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    label: String,
}

impl ProcessRunner {
    /// A timeout of zero disables the deadline.
    pub fn new(timeout_seconds: u64) -> Self {
        let timeout = (timeout_seconds > 0).then_some(Duration::from_secs(timeout_seconds));
        Self {
            timeout,
            label: "process".into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prefix used for the child's log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn run(
        &self,
        command: &[OsString],
        env: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> io::Result<RunOutcome> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        debug!(
            "{} run: {} timeout={:?}",
            self.label,
            render_command(command),
            self.timeout
        );

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let stdout_drain = Drain::spawn(child.stdout.take(), format!("{} stdout", self.label));
        let stderr_drain = Drain::spawn(child.stderr.take(), format!("{} stderr", self.label));

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WaitStatus::Completed(status),
                Ok(None) => {}
                Err(err) => {
                    kill_and_reap(&mut child, &self.label);
                    let deadline = Instant::now() + DRAIN_GRACE;
                    stdout_drain.finish(deadline);
                    stderr_drain.finish(deadline);
                    return Err(err);
                }
            }

            if cancel.is_cancelled() {
                warn!("{} interrupted; killing pid {}", self.label, child.id());
                kill_and_reap(&mut child, &self.label);
                break WaitStatus::Interrupted;
            }

            if let Some(timeout) = self.timeout
                && start.elapsed() > timeout
            {
                warn!("{} timed out after {:?}; killing pid {}", self.label, timeout, child.id());
                kill_and_reap(&mut child, &self.label);
                break WaitStatus::TimedOut;
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        let deadline = Instant::now() + DRAIN_GRACE;
        let mut stdout = stdout_drain.finish(deadline);
        let mut stderr = stderr_drain.finish(deadline);
        if stdout.is_none() || stderr.is_none() {
            // The child exited but something it started still holds a pipe.
            warn!("{} left processes holding its output open; killing them", self.label);
            kill_group(&child, &self.label);
            let deadline = Instant::now() + DRAIN_GRACE;
            if stdout.is_none() {
                stdout = stdout_drain.finish(deadline);
            }
            if stderr.is_none() {
                stderr = stderr_drain.finish(deadline);
            }
        }
        let elapsed = start.elapsed();
        debug!("{} finished: {:?} in {:?}", self.label, status, elapsed);

        Ok(RunOutcome {
            status,
            elapsed,
            timeout: self.timeout,
            stdout: stdout.unwrap_or_default(),
            stderr: stderr.unwrap_or_default(),
        })
    }
}

pub fn render_command(command: &[OsString]) -> String {
    command
        .iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn kill_and_reap(child: &mut Child, label: &str) {
    kill_group(child, label);
    if let Err(err) = child.kill() {
        // Already exited between the poll and the kill.
        debug!("{label} kill: {err}");
    }
    if let Err(err) = child.wait() {
        warn!("{label} wait after kill failed: {err}");
    }
}

/// SIGKILLs every process in the child's group. The group id is the child's
/// pid and stays reserved while any member is alive.
#[cfg(unix)]
fn kill_group(child: &Child, label: &str) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg takes no pointers; a stale group id yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!("{label} killpg {pgid}: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child, _label: &str) {}

/// Background reader for one output stream. The captured text comes back
/// over a channel so the supervisor can stop waiting for it.
struct Drain {
    rx: Option<Receiver<String>>,
    label: String,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(stream: Option<R>, label: String) -> Self {
        let Some(stream) = stream else {
            return Self { rx: None, label };
        };
        let (tx, rx) = mpsc::channel();
        let thread_label = label.clone();
        std::thread::spawn(move || {
            let _ = tx.send(read_stream(stream, &thread_label));
        });
        Self { rx: Some(rx), label }
    }

    /// `None` if the stream is still open at `deadline`.
    fn finish(&self, deadline: Instant) -> Option<String> {
        let Some(rx) = &self.rx else {
            return Some(String::new());
        };
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(text) => Some(text),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!("{} still open", self.label);
                None
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("{} reader thread panicked", self.label);
                Some(String::new())
            }
        }
    }
}

/// Reads `stream` to EOF in fixed-size chunks. Keeps the first
/// [`MAX_CAPTURED_BYTES`] and logs complete lines at debug.
fn read_stream<R: Read>(mut stream: R, label: &str) -> String {
    let mut captured = Vec::new();
    let mut line = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("{label} read failed: {err}");
                break;
            }
        };
        let chunk = &buf[..n];
        let room = MAX_CAPTURED_BYTES.saturating_sub(captured.len());
        captured.extend_from_slice(&chunk[..room.min(n)]);

        for piece in chunk.split_inclusive(|b| *b == b'\n') {
            line.extend_from_slice(piece);
            if piece.ends_with(b"\n") || line.len() >= MAX_LOG_LINE {
                log_line(label, &line);
                line.clear();
            }
        }
    }
    log_line(label, &line);
    String::from_utf8_lossy(&captured).into_owned()
}

fn log_line(label: &str, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim_end();
    if !trimmed.is_empty() {
        debug!("{label}: {trimmed}");
    }
}
