//! `wallet-bridge run`: a terminal front end over the worker.

use crate::app::App;
use crate::config::{BridgeConfig, KILL_QUEUE_SIGNAL};
use crate::error::BridgeError;
use crate::pagination::WALLET_TXN_PAGE_SIZE;
use crate::shutdown::{CloseOutcome, CloseRequest, UiSurface};
use crate::supervisor::ShutdownOutcome;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Terminal stand-in for the desktop window.
pub struct TerminalSurface {
    closing: watch::Sender<bool>,
}

impl TerminalSurface {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self { closing }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UiSurface for TerminalSurface {
    async fn broadcast(&self, signal: &str) {
        info!(signal, "Broadcasting to terminal");
        if signal == KILL_QUEUE_SIGNAL {
            self.closing.send_replace(true);
        }
    }

    async fn hide(&self) {
        eprintln!("Shutting down wallet worker...");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputLine {
    Blank,
    Txns { page: u32, page_size: usize },
    Operation { operation: String, params: Vec<Value> },
}

pub fn parse_input_line(line: &str) -> Result<InputLine, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(InputLine::Blank);
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    if head == "txns" {
        let mut parts = rest.split_whitespace();
        let page = parts
            .next()
            .unwrap_or("1")
            .parse::<u32>()
            .map_err(|err| format!("invalid page: {err}"))?;
        if page == 0 {
            return Err("pages start at 1".to_string());
        }
        let page_size = match parts.next() {
            Some(size) => size
                .parse::<usize>()
                .map_err(|err| format!("invalid page size: {err}"))?,
            None => WALLET_TXN_PAGE_SIZE,
        };
        return Ok(InputLine::Txns { page, page_size });
    }

    let params = if rest.is_empty() {
        Vec::new()
    } else {
        match serde_json::from_str::<Value>(rest).map_err(|err| format!("invalid params: {err}"))? {
            Value::Array(params) => params,
            other => vec![other],
        }
    };

    Ok(InputLine::Operation {
        operation: head.to_string(),
        params,
    })
}

pub async fn run(config: BridgeConfig) -> Result<i32, BridgeError> {
    let surface = Arc::new(TerminalSurface::new());
    let mut closing = surface.subscribe();
    let app = App::start(config, surface.clone()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut outstanding = JoinSet::new();
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
            _ = closing.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => submit_line(&app, &line, &mut outstanding),
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Failed to read stdin");
                    break;
                }
            },
        }
    }

    if !interrupted {
        while outstanding.join_next().await.is_some() {}
    }

    let mut request = CloseRequest::new();
    let exit_code = match app.close_requested(&mut request).await {
        CloseOutcome::ShutDown(report) if report.outcome == ShutdownOutcome::Forced => {
            warn!("Worker had to be killed");
            0
        }
        CloseOutcome::ShutdownFailed(_) => 1,
        _ => 0,
    };

    // Completions for tasks refused during shutdown.
    while outstanding.join_next().await.is_some() {}
    Ok(exit_code)
}

fn submit_line(app: &App, line: &str, outstanding: &mut JoinSet<()>) {
    match parse_input_line(line) {
        Ok(InputLine::Blank) => {}
        Ok(InputLine::Txns { page, page_size }) => {
            let wallet = app.wallet();
            outstanding.spawn(async move {
                match wallet.fetch_wallet_txns(page, page_size).await {
                    Ok(page) => print_json(json!({
                        "page": page.plan.requested_page,
                        "fetched_page": page.plan.page,
                        "kept_count": page.kept_count,
                        "walletTxns": page.txns,
                    })),
                    Err(err) => eprintln!("txns: {}", err.notification()),
                }
            });
        }
        Ok(InputLine::Operation { operation, params }) => {
            let completion = app.queue().submit(operation.clone(), params);
            outstanding.spawn(async move {
                match completion.await {
                    Ok(result) => print_json(json!({ "operation": operation, "result": result })),
                    Err(err) => eprintln!("{operation}: {}", err.message()),
                }
            });
        }
        Err(message) => eprintln!("{message}"),
    }
}

fn print_json(value: Value) {
    println!("{value}");
}
