//! Bounded subprocess execution.
//!
//! Every external process the build drives (git, the API extractor, the
//! notebook executor) goes through [`run_with_timeout`], so no stage can
//! block the run indefinitely.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{DocError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long pipes get to close once a leftover process group is killed.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last non-empty stderr line, capped at 200 chars. Good enough to tell
    /// a failed notebook or extractor apart in a log line.
    pub fn stderr_summary(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let last = text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("unknown error");
        last.chars().take(200).collect()
    }
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// `what` names the process in the timeout error. stdout and stderr are
/// drained on helper threads so a chatty child cannot fill its pipe and
/// stall. On unix the child leads its own process group; a timeout kills
/// the whole group, and so does a leftover descendant (a kernel, a git
/// helper) that still holds the output pipes when the deadline passes.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration, what: &str) -> Result<ProcessOutput> {
    isolate_process_group(cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DocError::Other(format!("failed to spawn {what}: {e}")))?;
    let deadline = Instant::now() + timeout;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = wait_until(&mut child, deadline)? else {
        kill_tree(&mut child);
        let _ = child.wait();
        return Err(DocError::Timeout {
            what: what.to_string(),
            seconds: timeout.as_secs(),
        });
    };

    let mut out = collect(&stdout, deadline);
    let mut err = collect(&stderr, deadline);
    if out.is_none() || err.is_none() {
        warn!(what, "output pipes held open after exit; killing process group");
        kill_tree(&mut child);
        let grace = Instant::now() + KILL_GRACE;
        out = out.or_else(|| collect(&stdout, grace));
        err = err.or_else(|| collect(&stderr, grace));
    }

    Ok(ProcessOutput {
        status,
        stdout: out.unwrap_or_default(),
        stderr: err.unwrap_or_default(),
    })
}

fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// The drained pipe contents, or `None` if the pipe is still open at `deadline`.
fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant) -> Option<Vec<u8>> {
    rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .ok()
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}
