//! Close-request handling for the primary UI surface.
//!
//! Sequence: stop new submissions from the UI, hide it, stop the worker,
//! then allow the process to exit. A failed worker stop is logged and the
//! application still exits.

use crate::config::KILL_QUEUE_SIGNAL;
use crate::supervisor::{ShutdownReport, WorkerLifecycle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

/// The window (or terminal) that owns the user's session.
#[async_trait]
pub trait UiSurface: Send + Sync {
    /// Deliver an out-of-band signal to every view hosted by the surface.
    async fn broadcast(&self, signal: &str);

    /// Stop accepting user input. The surface stays alive until exit.
    async fn hide(&self);
}

/// The UI framework's close event. Preventing the default keeps the
/// application alive until shutdown finishes.
#[derive(Debug, Default)]
pub struct CloseRequest {
    default_prevented: bool,
}

impl CloseRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Every variant permits the process to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    AlreadyShutDown,
    ShutDown(ShutdownReport),
    ShutdownFailed(String),
}

pub struct ShutdownOrchestrator {
    supervisor: Arc<dyn WorkerLifecycle>,
    surface: Arc<dyn UiSurface>,
    grace_period: Duration,
    complete: AtomicBool,
    sequence: Mutex<()>,
}

impl ShutdownOrchestrator {
    pub fn new(
        supervisor: Arc<dyn WorkerLifecycle>,
        surface: Arc<dyn UiSurface>,
        grace_period: Duration,
    ) -> Self {
        Self {
            supervisor,
            surface,
            grace_period,
            complete: AtomicBool::new(false),
            sequence: Mutex::new(()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub async fn close_requested(&self, request: &mut CloseRequest) -> CloseOutcome {
        if self.is_complete() {
            return CloseOutcome::AlreadyShutDown;
        }
        request.prevent_default();

        let _sequence = self.sequence.lock().await;
        if self.is_complete() {
            return CloseOutcome::AlreadyShutDown;
        }

        info!("Close requested, shutting down");
        self.surface.broadcast(KILL_QUEUE_SIGNAL).await;
        self.surface.hide().await;

        // Run on its own task so a panic inside stop() cannot keep us from exiting.
        let supervisor = self.supervisor.clone();
        let grace_period = self.grace_period;
        let outcome = match tokio::spawn(async move { supervisor.stop(grace_period).await }).await {
            Ok(report) => CloseOutcome::ShutDown(report),
            Err(err) => {
                error!(error = %err, "Worker stop failed, exiting anyway");
                CloseOutcome::ShutdownFailed(err.to_string())
            }
        };

        self.complete.store(true, Ordering::SeqCst);
        info!("Shutdown complete");
        outcome
    }
}
