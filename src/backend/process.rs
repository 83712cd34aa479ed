//! Child process supervision
//!
//! The executable runs as `executable <parameter pipe>` from its own
//! directory, in a fresh process group so that a timeout can take down
//! anything it spawned. Stdout (and stderr, unless inherited) is drained on
//! helper threads while the process runs. Those captures share the
//! process deadline, so a leftover background job holding the output open
//! cannot stretch a run past it.

use crate::error::{CambError, Result};
use crossbeam_channel::{bounded, Receiver};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// How to start the executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Absolute path of the executable
    pub program: PathBuf,
    /// Directory the process runs in
    pub working_dir: PathBuf,
    /// Parameter pipe, passed as the only argument
    pub param_file: PathBuf,
    pub capture_stderr: bool,
    /// Process wait cadence when a deadline is set
    pub poll_interval: Duration,
}

/// What the process left behind
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Starts the executable and waits for it
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLauncher: Send + Sync {
    /// Run to completion, or kill the process and fail with a timeout
    /// once `deadline` passes
    fn run(&self, request: &LaunchRequest, deadline: Option<Instant>) -> Result<ProcessOutput>;
}

/// Launches real OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

/// Buffer delivered by a capture thread once its stream closes
type Capture = Receiver<Vec<u8>>;

fn drain<R: Read + Send + 'static>(source: Option<R>, label: &str) -> Option<Capture> {
    let mut source = source?;
    let (tx, rx) = bounded(1);
    let thread_label = label.to_string();
    std::thread::Builder::new()
        .name(format!("camb-{}", label))
        .spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = source.read_to_end(&mut buf) {
                tracing::warn!("Failed to capture {}: {}", thread_label, e);
            }
            let _ = tx.send(buf);
        })
        .map_err(|e| tracing::warn!("Failed to start {} capture: {}", label, e))
        .ok()?;
    Some(rx)
}

/// Wait for a capture; `None` if the deadline passed with the stream still open
fn collect(capture: Option<&Capture>, deadline: Option<Instant>) -> Option<Vec<u8>> {
    let Some(rx) = capture else {
        return Some(Vec::new());
    };
    let received = match deadline {
        Some(deadline) => rx.recv_deadline(deadline).map_err(|e| e.is_timeout()),
        None => rx.recv().map_err(|_| false),
    };
    match received {
        Ok(buf) => Some(buf),
        Err(true) => None,
        // The capture thread died without sending
        Err(false) => Some(Vec::new()),
    }
}

fn signal_group(pgid: Pid) -> bool {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("killpg({}) failed: {}", pgid, e);
            false
        }
    }
}

fn kill_group(child: &mut Child) {
    if !signal_group(Pid::from_raw(child.id() as i32)) {
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn wait_until(child: &mut Child, deadline: Option<Instant>, poll: Duration) -> Result<ExitStatus> {
    let Some(deadline) = deadline else {
        return Ok(child.wait()?);
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        let now = Instant::now();
        if now >= deadline {
            kill_group(child);
            return Err(CambError::Timeout(format!(
                "process {} did not exit in time",
                child.id()
            )));
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

impl ProcessLauncher for SystemLauncher {
    fn run(&self, request: &LaunchRequest, deadline: Option<Instant>) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&request.program);
        cmd.arg(&request.param_file)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if request.capture_stderr {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .process_group(0);

        let mut child = cmd.spawn().map_err(|source| CambError::Spawn {
            program: request.program.clone(),
            source,
        })?;
        tracing::debug!("Started {:?} as pid {}", request.program, child.id());

        let stdout = drain(child.stdout.take(), "stdout");
        let stderr = drain(child.stderr.take(), "stderr");

        // On timeout the capture threads are left to finish on their own
        let status = wait_until(&mut child, deadline, request.poll_interval)?;
        tracing::debug!("Process {} exited with {}", child.id(), status);

        // Anything the process started may still hold its output open
        let captured = collect(stdout.as_ref(), deadline)
            .zip(collect(stderr.as_ref(), deadline));
        let Some((stdout, stderr)) = captured else {
            tracing::warn!("Output of process {} still open at the deadline", child.id());
            signal_group(Pid::from_raw(child.id() as i32));
            return Err(CambError::Timeout(format!(
                "output of process {} still open at the deadline",
                child.id()
            )));
        };

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    }
}
