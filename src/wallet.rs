//! Named wallet operations issued by the desktop UI.
//!
//! Every call goes through the shared [`TaskQueue`]; the worker treats the
//! operation names as opaque RPC methods.

use crate::error::QueueError;
use crate::pagination::{CursorMap, PagePlan, RecordKey};
use crate::queue::TaskQueue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error};

pub mod operations {
    pub const FETCH_WALLET_BALANCE: &str = "fetchWalletBalance";
    pub const FETCH_PENDING_BALANCE: &str = "fetchPendingBalance";
    pub const FETCH_WALLET_TXNS: &str = "fetchWalletTxns";
    pub const FETCH_SEND_DATA: &str = "fetchSendData";
    pub const FETCH_PAYMENT_REQUESTS: &str = "fetchPaymentRequests";
    pub const ADD_RECEIVE_TXNS: &str = "addReceiveTxns";
    pub const REMOVE_RECEIVE_TXNS: &str = "removeReceiveTxns";
}

const NO_DATA_FOUND: &str = "No data found";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("No data found")]
    NoData,
    #[error("Unexpected {operation} result: {message}")]
    Decode { operation: &'static str, message: String },
}

impl WalletError {
    /// Text for the failure notification shown to the user.
    pub fn notification(&self) -> String {
        match self {
            WalletError::Queue(err) => err.message(),
            WalletError::NoData => NO_DATA_FOUND.to_string(),
            WalletError::Decode { message, .. } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTxn {
    #[serde(rename = "txnId")]
    pub txn_id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl RecordKey for WalletTxn {
    type Key = String;

    fn record_key(&self) -> String {
        self.txn_id.clone()
    }
}

/// One deduplicated page of wallet transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnPage {
    pub plan: PagePlan,
    pub txns: Vec<WalletTxn>,
    pub kept_count: i64,
    /// Remaining fields of the worker result, e.g. totals.
    pub extra: Map<String, Value>,
}

pub struct WalletService {
    queue: TaskQueue,
    // Held across a whole page fetch, which serializes fetches per session.
    listing: Mutex<CursorMap>,
}

impl WalletService {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            listing: Mutex::new(CursorMap::new()),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    async fn call(&self, operation: &'static str, params: Vec<Value>) -> Result<Value, WalletError> {
        self.queue.submit(operation, params).await.map_err(|err| {
            error!(operation, error = %err, "Wallet operation failed");
            WalletError::from(err)
        })
    }

    pub async fn fetch_wallet_balance(&self) -> Result<Value, WalletError> {
        self.call(operations::FETCH_WALLET_BALANCE, Vec::new()).await
    }

    pub async fn fetch_pending_balance(&self) -> Result<Value, WalletError> {
        self.call(operations::FETCH_PENDING_BALANCE, Vec::new()).await
    }

    pub async fn fetch_send_data(&self) -> Result<Value, WalletError> {
        match self.call(operations::FETCH_SEND_DATA, Vec::new()).await? {
            Value::Null => Err(WalletError::NoData),
            data => Ok(data),
        }
    }

    pub async fn fetch_payment_requests(&self) -> Result<Value, WalletError> {
        self.call(operations::FETCH_PAYMENT_REQUESTS, Vec::new()).await
    }

    pub async fn add_receive_txns(&self, payload: Value) -> Result<Value, WalletError> {
        self.call(operations::ADD_RECEIVE_TXNS, vec![payload]).await
    }

    pub async fn remove_receive_txns(&self, payload: Value) -> Result<Value, WalletError> {
        self.call(operations::REMOVE_RECEIVE_TXNS, vec![payload]).await
    }

    /// Fetch page `page` of the transaction list, deduplicated to at most
    /// `page_size` records. The cursor map is only updated on success.
    pub async fn fetch_wallet_txns(&self, page: u32, page_size: usize) -> Result<TxnPage, WalletError> {
        let mut cursor = self.listing.lock().await;
        let plan = cursor.plan(page, page_size);
        debug!(?plan, "Fetching wallet transactions");

        let result = self
            .call(
                operations::FETCH_WALLET_TXNS,
                vec![json!(plan.page), json!(plan.size), json!(plan.remapped)],
            )
            .await?;

        let Value::Object(mut extra) = result else {
            return Err(WalletError::NoData);
        };
        let raw = match extra.remove("walletTxns") {
            Some(Value::Array(raw)) => raw,
            _ => return Err(WalletError::NoData),
        };
        let raw: Vec<WalletTxn> = raw
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|err| WalletError::Decode {
                operation: operations::FETCH_WALLET_TXNS,
                message: err.to_string(),
            })?;

        let dedup = cursor.apply(&plan, &raw, page_size);
        Ok(TxnPage {
            plan,
            txns: dedup.selected,
            kept_count: dedup.kept_count,
            extra,
        })
    }

    /// Listing view was reset; forget all page adjustments.
    pub async fn reset_listing(&self) {
        self.listing.lock().await.clear();
    }

    pub async fn cursor_snapshot(&self) -> CursorMap {
        self.listing.lock().await.clone()
    }
}
