// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-request child process supervision.
//!
//! One [`Supervisor`] owns one child for one HTTP request: it spawns the
//! process in its workspace, writes the prompt to stdin and closes it, turns
//! stdout lines into [`SupervisorEvent`]s, logs stderr, and enforces two
//! deadlines:
//!
//! - **total**: wall-clock ceiling for the whole run;
//! - **inactivity**: maximum silence on stdout, reset on every line *before*
//!   classification, so a slow downstream consumer can never trigger a
//!   spurious kill.
//!
//! Termination is always two-phase: SIGTERM to the child's process group
//! (the child calls `setsid`, so pgid == pid and grandchildren die with it),
//! a bounded wait for the kill grace, then SIGKILL.  The sequence runs
//! inline against the owned `Child`, so the pid is reaped exactly once and
//! a recycled pid can never be signalled by mistake.
//!
//! Event-channel guarantees:
//! - events are serialized — the consumer sees one at a time, in stdout
//!   order;
//! - a synthetic [`SupervisorEvent::Timeout`] is the last event when a
//!   deadline fires;
//! - the channel closes only after the child has been reaped and the
//!   registry entry removed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::events::{classify_line, ParsedLine};
use crate::registry::{ActiveRegistry, SupervisorControl};

/// Buffered events between the reader and the HTTP writer.  Small on
/// purpose: backpressure is the mechanism that keeps a fast child from
/// racing ahead of a slow client.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Deadlines for one supervised run.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub total_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub kill_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_millis(3_600_000),
            inactivity_timeout: Duration::from_millis(300_000),
            kill_grace: Duration::from_millis(5_000),
        }
    }
}

impl SupervisorSettings {
    pub fn from_millis(total: u64, inactivity: u64, kill_grace: u64) -> Self {
        Self {
            total_timeout: Duration::from_millis(total),
            inactivity_timeout: Duration::from_millis(inactivity),
            kill_grace: Duration::from_millis(kill_grace),
        }
    }
}

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Total,
    Inactivity,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Total => write!(f, "Total timeout"),
            TimeoutKind::Inactivity => write!(f, "Inactivity timeout"),
        }
    }
}

/// One event surfaced to the request coordinator.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A classified stdout line (raw text preserved for pass-through).
    Line(ParsedLine),
    /// A deadline fired; the child is being terminated.  Always the final
    /// event before the channel closes.
    Timeout { kind: TimeoutKind, limit: Duration },
}

/// Spawn-time failures, surfaced to the client through the stream writer.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("child program not found: {0}")]
    NotFound(String),
    #[error("permission denied executing child program: {0}")]
    PermissionDenied(String),
    #[error("child stdio could not be captured")]
    Stdio,
    #[error("spawning child: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle for one supervised child run.
#[derive(Debug)]
pub struct Supervisor {
    id: u64,
    pid: Option<u32>,
    events: mpsc::Receiver<SupervisorEvent>,
    control: SupervisorControl,
}

impl Supervisor {
    /// Spawn the child and start supervising it.
    ///
    /// `stdin_payload` is written to the child's stdin in a background task
    /// and the pipe is closed afterwards, so a prompt larger than the pipe
    /// buffer cannot deadlock against an unread stdout.
    pub fn spawn(
        binary: &str,
        args: &[String],
        cwd: &Path,
        stdin_payload: String,
        settings: SupervisorSettings,
        registry: &ActiveRegistry,
    ) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Backstop only: the normal path reaps via two-phase terminate.
            .kill_on_drop(true);

        // New session: detaches the child from our terminal and makes
        // pgid == pid, so group signals reach grandchildren too.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound(binary.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SpawnError::PermissionDenied(binary.to_string())
            }
            _ => SpawnError::Io(e),
        })?;

        let pid = child.id();
        info!(pid = ?pid, binary, cwd = %cwd.display(), "child spawned");

        let mut stdin = child.stdin.take().ok_or(SpawnError::Stdio)?;
        let stdout = child.stdout.take().ok_or(SpawnError::Stdio)?;
        let stderr = child.stderr.take().ok_or(SpawnError::Stdio)?;

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(stdin_payload.as_bytes()).await {
                debug!(error = %e, "child closed stdin before the prompt was fully written");
                return;
            }
            let _ = stdin.shutdown().await;
            // Dropping the handle closes the pipe — the child sees EOF.
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(stream = "stderr", pid = ?pid, "{line}");
            }
        });

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let control = SupervisorControl::new(pid);
        let id = registry.register(control.clone());

        tokio::spawn(run_driver(
            child,
            stdout,
            tx,
            control.clone(),
            settings,
            registry.clone(),
            id,
        ));

        Ok(Self {
            id,
            pid,
            events: rx,
            control,
        })
    }

    /// Await the next event.  Returns None once the child has exited and
    /// the registry entry is gone.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        self.events.recv().await
    }

    /// Request graceful termination.  Idempotent.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Why the read loop stopped.
enum LoopExit {
    /// Child closed stdout (normal end of output).
    Eof,
    /// A deadline fired; the timeout event has already been sent.
    TimedOut,
    /// Cancelled externally, or the event consumer hung up.
    Cancelled,
}

async fn run_driver(
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<SupervisorEvent>,
    control: SupervisorControl,
    settings: SupervisorSettings,
    registry: ActiveRegistry,
    id: u64,
) {
    let mut lines = BufReader::new(stdout).lines();
    let total_deadline = Instant::now() + settings.total_timeout;
    let mut inactivity_deadline = Instant::now() + settings.inactivity_timeout;

    let exit = loop {
        tokio::select! {
            biased;
            () = control.cancelled() => {
                info!(id, pid = ?control.pid, "supervisor cancelled");
                break LoopExit::Cancelled;
            }
            () = sleep_until(total_deadline) => {
                warn!(id, pid = ?control.pid, "total deadline fired");
                let _ = tx.send(SupervisorEvent::Timeout {
                    kind: TimeoutKind::Total,
                    limit: settings.total_timeout,
                }).await;
                break LoopExit::TimedOut;
            }
            () = sleep_until(inactivity_deadline) => {
                warn!(id, pid = ?control.pid, "inactivity deadline fired");
                let _ = tx.send(SupervisorEvent::Timeout {
                    kind: TimeoutKind::Inactivity,
                    limit: settings.inactivity_timeout,
                }).await;
                break LoopExit::TimedOut;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    // Reset before classification: parsing and the consumer's
                    // processing time must not count as child inactivity.
                    inactivity_deadline = Instant::now() + settings.inactivity_timeout;
                    if let Some(parsed) = classify_line(&line) {
                        if tx.send(SupervisorEvent::Line(parsed)).await.is_err() {
                            debug!(id, "event consumer gone, stopping child");
                            break LoopExit::Cancelled;
                        }
                    }
                }
                Ok(None) => break LoopExit::Eof,
                Err(e) => {
                    warn!(id, error = %e, "child stdout read failed");
                    break LoopExit::Eof;
                }
            }
        }
    };

    // Release the stdout pipe so a child blocked on a full pipe can make
    // progress toward exit during the grace window.
    drop(lines);

    match exit {
        LoopExit::Eof => {
            // Output is done; the child normally exits on its own within
            // moments.  Escalate only if it lingers.
            match timeout(settings.kill_grace, child.wait()).await {
                Ok(Ok(status)) => info!(id, ?status, "child exited"),
                Ok(Err(e)) => warn!(id, error = %e, "waiting for child"),
                Err(_) => terminate(&mut child, settings.kill_grace).await,
            }
        }
        LoopExit::TimedOut | LoopExit::Cancelled => {
            terminate(&mut child, settings.kill_grace).await;
        }
    }

    registry.remove(id);
    // tx drops here; the event channel closes only after the child is
    // reaped and the registry entry is gone.
}

/// Two-phase termination: graceful signal, bounded wait, forceful signal.
///
/// The forceful signal is sent only after the graceful one, and only once
/// the full kill grace has elapsed.
async fn terminate(child: &mut Child, kill_grace: Duration) {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            // Already reaped.
            return;
        };
        info!(pid, "sending SIGTERM to child process group");
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        match timeout(kill_grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, ?status, "child exited after SIGTERM");
                return;
            }
            Ok(Err(e)) => {
                warn!(pid, error = %e, "waiting for child after SIGTERM");
                return;
            }
            Err(_) => {
                warn!(pid, grace = ?kill_grace, "child survived SIGTERM, sending SIGKILL");
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
        }
        if let Err(e) = child.wait().await {
            warn!(pid, error = %e, "waiting for child after SIGKILL");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = kill_grace;
        let _ = child.kill().await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
