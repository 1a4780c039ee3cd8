//! Wallet Bridge Library
//!
//! Supervises the wallet worker process, serializes UI requests into it
//! through a single ordered queue, deduplicates paged transaction listings
//! and shuts the worker down without losing in-flight work.

pub mod app;
pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod pagination;
pub mod platform;
pub mod protocol;
pub mod queue;
pub mod shutdown;
pub mod supervisor;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use app::App;
pub use config::BridgeConfig;
pub use error::{BridgeError, ChannelError, QueueError, StartupError};
pub use pagination::{dedup_page, CursorMap, DedupResult, PagePlan, RecordKey};
pub use queue::{Completion, DrainReport, TaskQueue};
pub use shutdown::{CloseOutcome, CloseRequest, ShutdownOrchestrator, UiSurface};
pub use supervisor::{
    ShutdownOutcome, ShutdownReport, WorkerLifecycle, WorkerState, WorkerSupervisor,
};
pub use wallet::{TxnPage, WalletError, WalletService, WalletTxn};
