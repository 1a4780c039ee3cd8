//! Composition root: one supervisor, one queue, one wallet facade and the
//! shutdown orchestrator, created together and torn down together.

use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::queue::TaskQueue;
use crate::shutdown::{CloseOutcome, CloseRequest, ShutdownOrchestrator, UiSurface};
use crate::supervisor::WorkerSupervisor;
use crate::wallet::WalletService;
use std::sync::Arc;
use tracing::info;

pub struct App {
    supervisor: Arc<WorkerSupervisor>,
    wallet: Arc<WalletService>,
    orchestrator: ShutdownOrchestrator,
}

impl App {
    /// Start the worker. A [`StartupError`](crate::error::StartupError) here
    /// is fatal to the session.
    pub async fn start(config: BridgeConfig, surface: Arc<dyn UiSurface>) -> BridgeResult<Self> {
        config.validate()?;
        let grace_period = config.grace_period();
        let supervisor = Arc::new(WorkerSupervisor::new(config));
        let queue = supervisor.start().await?;

        info!(pid = ?supervisor.pid(), "Wallet bridge ready");
        Ok(Self {
            wallet: Arc::new(WalletService::new(queue)),
            orchestrator: ShutdownOrchestrator::new(supervisor.clone(), surface, grace_period),
            supervisor,
        })
    }

    pub fn queue(&self) -> &TaskQueue {
        self.wallet.queue()
    }

    pub fn wallet(&self) -> Arc<WalletService> {
        self.wallet.clone()
    }

    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    pub async fn close_requested(&self, request: &mut CloseRequest) -> CloseOutcome {
        self.orchestrator.close_requested(request).await
    }
}
