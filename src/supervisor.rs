//! Worker process lifecycle
//!
//! `NotStarted -> Running -> Stopping -> Stopped`, never backwards. Stopping
//! drains the task queue, asks the worker to exit, waits out a grace period
//! and only then kills it.

use crate::channel::StdioChannel;
use crate::config::BridgeConfig;
use crate::error::StartupError;
use crate::platform;
use crate::queue::{DrainReport, TaskQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotStarted => "not_started",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// How the worker ended up stopped. Diagnostic only; every variant means
/// the process is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    NeverStarted,
    /// `start()` failed; a process that was spawned has been killed.
    StartupFailed,
    Graceful,
    /// Grace period elapsed and the worker was killed.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    pub drain: Option<DrainReport>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ShutdownReport {
    fn finished(outcome: ShutdownOutcome, started_at: DateTime<Utc>) -> Self {
        Self {
            outcome,
            drain: None,
            exit_code: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn never_started() -> Self {
        Self::finished(ShutdownOutcome::NeverStarted, Utc::now())
    }
}

/// What the shutdown path needs from the worker.
#[async_trait]
pub trait WorkerLifecycle: Send + Sync + 'static {
    async fn stop(&self, grace_period: Duration) -> ShutdownReport;
}

pub struct WorkerSupervisor {
    shared: Arc<Shared>,
}

struct Shared {
    config: BridgeConfig,
    state: watch::Sender<WorkerState>,
    // Also serializes start() against stop().
    child: Mutex<Option<Child>>,
    pid: OnceLock<u32>,
    queue: OnceLock<TaskQueue>,
    report: OnceLock<ShutdownReport>,
}

impl WorkerSupervisor {
    pub fn new(config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::NotStarted);
        Self {
            shared: Arc::new(Shared {
                config,
                state,
                child: Mutex::new(None),
                pid: OnceLock::new(),
                queue: OnceLock::new(),
                report: OnceLock::new(),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.shared.state.subscribe()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.pid.get().copied()
    }

    pub fn queue(&self) -> Option<TaskQueue> {
        self.shared.queue.get().cloned()
    }

    /// Report of the completed stop sequence, if any.
    pub fn shutdown_report(&self) -> Option<ShutdownReport> {
        self.shared.report.get().cloned()
    }

    /// Launch the worker, wait for its `ready` line and start the queue on
    /// top of its stdio.
    pub async fn start(&self) -> Result<TaskQueue, StartupError> {
        let shared = &self.shared;
        let mut slot = shared.child.lock().await;
        let current = shared.state();
        if current != WorkerState::NotStarted {
            return Err(StartupError::AlreadyStarted(current.to_string()));
        }
        let started_at = Utc::now();

        let worker = &shared.config.worker;
        let mut command = Command::new(&worker.program);
        command
            .args(&worker.args)
            .envs(&worker.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &worker.working_dir {
            command.current_dir(dir);
        }
        platform::prepare_command(&mut command).map_err(|source| StartupError::Spawn {
            program: worker.program.clone(),
            source,
        })?;

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(program = %worker.program, error = %source, "Failed to spawn worker");
                shared.finish(ShutdownReport::finished(ShutdownOutcome::StartupFailed, started_at));
                return Err(StartupError::Spawn {
                    program: worker.program.clone(),
                    source,
                });
            }
        };
        let pid = child.id();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, pid));
        }

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            abort_child(&mut child).await;
            shared.finish(ShutdownReport::finished(ShutdownOutcome::StartupFailed, started_at));
            return Err(StartupError::Channel("worker stdio was not captured".to_string()));
        };

        let channel = StdioChannel::from_child(stdin, stdout);
        if let Err(err) = channel.handshake(shared.config.startup_timeout()).await {
            error!(pid = ?pid, error = %err, "Worker channel could not be established");
            abort_child(&mut child).await;
            shared.finish(ShutdownReport::finished(ShutdownOutcome::StartupFailed, started_at));
            return Err(err);
        }

        let queue = TaskQueue::start(Arc::new(channel));
        let _ = shared.queue.set(queue.clone());
        if let Some(pid) = pid {
            let _ = shared.pid.set(pid);
        }
        *slot = Some(child);
        shared.state.send_replace(WorkerState::Running);

        info!(pid = ?pid, program = %worker.program, "Worker started");
        Ok(queue)
    }

    /// Idempotent. The first caller starts the stop sequence; later or
    /// concurrent callers wait for it and get the same report. The sequence
    /// runs on its own task and completes even if every caller goes away.
    pub async fn stop(&self, grace_period: Duration) -> ShutdownReport {
        let previous = {
            let _start_guard = self.shared.child.lock().await;
            let previous = self.shared.state();
            match previous {
                WorkerState::NotStarted => self.shared.finish(ShutdownReport::never_started()),
                WorkerState::Running => {
                    self.shared.state.send_replace(WorkerState::Stopping);
                }
                WorkerState::Stopping | WorkerState::Stopped => {}
            }
            previous
        };

        if previous != WorkerState::Running {
            return self.shared.wait_stopped().await;
        }

        let shared = self.shared.clone();
        let sequence = tokio::spawn(async move { shared.run_stop_sequence(grace_period).await });
        match sequence.await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "Stop sequence aborted");
                self.shared.wait_stopped().await
            }
        }
    }
}

#[async_trait]
impl WorkerLifecycle for WorkerSupervisor {
    async fn stop(&self, grace_period: Duration) -> ShutdownReport {
        WorkerSupervisor::stop(self, grace_period).await
    }
}

impl Shared {
    fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Record the report, then publish `Stopped`. Waiters read the report
    /// as soon as they observe the state.
    fn finish(&self, report: ShutdownReport) {
        let _ = self.report.set(report);
        self.state.send_replace(WorkerState::Stopped);
    }

    async fn run_stop_sequence(&self, grace_period: Duration) -> ShutdownReport {
        let started_at = Utc::now();
        let pid = self.pid.get().copied();
        let mut guard = StopGuard {
            shared: self,
            pid,
            started_at,
            armed: true,
        };
        info!(pid = ?pid, grace_ms = grace_period.as_millis() as u64, "Stopping worker");

        let drain = match self.queue.get() {
            Some(queue) => {
                let report = queue.drain_and_stop(self.config.drain_timeout()).await;
                queue.close_channel().await;
                Some(report)
            }
            None => None,
        };

        let child = self.child.lock().await.take();
        let (outcome, exit_code) = match child {
            Some(mut child) => terminate(&mut child, grace_period).await,
            None => (ShutdownOutcome::Graceful, None),
        };

        let report = ShutdownReport {
            outcome,
            drain,
            exit_code,
            started_at,
            finished_at: Utc::now(),
        };
        guard.armed = false;
        self.finish(report.clone());

        info!(outcome = ?report.outcome, exit_code = ?report.exit_code, "Worker stopped");
        report
    }

    async fn wait_stopped(&self) -> ShutdownReport {
        let mut watcher = self.state.subscribe();
        let _ = watcher.wait_for(|state| *state == WorkerState::Stopped).await;
        self.report
            .get()
            .cloned()
            .unwrap_or_else(ShutdownReport::never_started)
    }
}

/// Publishes `Stopped` if the stop sequence unwinds or its task is dropped
/// before finishing, so waiters never hang on `Stopping`.
struct StopGuard<'a> {
    shared: &'a Shared,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    armed: bool,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(pid = ?self.pid, "Stop sequence interrupted, killing worker");
        if let Some(pid) = self.pid {
            if let Err(err) = platform::terminate_group(pid) {
                debug!(pid, error = %err, "Failed to kill worker process group");
            }
        }
        // Dropping the child kills it (kill_on_drop).
        if let Ok(mut slot) = self.shared.child.try_lock() {
            drop(slot.take());
        }
        self.shared
            .finish(ShutdownReport::finished(ShutdownOutcome::Forced, self.started_at));
    }
}

/// Signal, wait out the grace period, then escalate.
async fn terminate(child: &mut Child, grace_period: Duration) -> (ShutdownOutcome, Option<i32>) {
    let pid = child.id();
    if let Some(pid) = pid {
        if let Err(err) = platform::request_stop(pid) {
            warn!(pid, error = %err, "Failed to send stop request to worker");
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(pid = ?pid, status = %status, "Worker exited within grace period");
            (ShutdownOutcome::Graceful, status.code())
        }
        Ok(Err(err)) => {
            warn!(pid = ?pid, error = %err, "Waiting for worker failed, killing it");
            force_kill(child, pid).await;
            (ShutdownOutcome::Forced, None)
        }
        Err(_) => {
            warn!(
                pid = ?pid,
                grace_ms = grace_period.as_millis() as u64,
                "Worker did not exit within grace period, killing it"
            );
            force_kill(child, pid).await;
            (ShutdownOutcome::Forced, None)
        }
    }
}

async fn force_kill(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(err) = platform::terminate_group(pid) {
            warn!(pid, error = %err, "Failed to kill worker process group");
        }
    }
    if let Err(err) = child.kill().await {
        debug!(pid = ?pid, error = %err, "Worker already gone");
    }
}

async fn abort_child(child: &mut Child) {
    let pid = child.id();
    force_kill(child, pid).await;
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "wallet_bridge::worker", pid = ?pid, "{}", line),
            Ok(None) => break,
            Err(err) => {
                debug!(pid = ?pid, error = %err, "Worker stderr closed");
                break;
            }
        }
    }
}
