//! Request/response channel to the worker process.
//!
//! The [`TaskQueue`](crate::queue::TaskQueue) is the only writer; it keeps at
//! most one request outstanding, so a call is a write followed by reading
//! lines until the matching response arrives.

use crate::error::{ChannelError, StartupError};
use crate::protocol::{self, WorkerMessage, WorkerRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Split};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[async_trait]
pub trait WorkerChannel: Send + Sync + 'static {
    /// Send one request and wait for its response.
    async fn call(&self, request: WorkerRequest) -> Result<Value, ChannelError>;

    /// Close the request direction. The worker sees end of input.
    async fn close(&self);
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedLines = Split<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

pub struct StdioChannel {
    writer: Mutex<Option<BoxedWriter>>,
    reader: Mutex<BoxedLines>,
}

impl StdioChannel {
    pub fn new<W, R>(writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            reader: Mutex::new(BufReader::new(reader).split(b'\n')),
        }
    }

    pub fn from_child(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(stdin, stdout)
    }

    /// Wait for the worker's `ready` line.
    pub async fn handshake(&self, timeout: Duration) -> Result<(), StartupError> {
        let wait_ready = async {
            let mut reader = self.reader.lock().await;
            loop {
                let line = reader
                    .next_segment()
                    .await
                    .map_err(|err| StartupError::Channel(err.to_string()))?
                    .ok_or_else(|| {
                        StartupError::Channel("worker closed its output before ready".to_string())
                    })?;
                match protocol::decode_line(&line) {
                    Ok(WorkerMessage::Ready) => return Ok(()),
                    Ok(other) => {
                        warn!(message = ?other, "Unexpected worker message before ready");
                    }
                    Err(_) => skip_output(&line),
                }
            }
        };

        tokio::time::timeout(timeout, wait_ready)
            .await
            .map_err(|_| StartupError::Timeout { timeout })?
    }
}

#[async_trait]
impl WorkerChannel for StdioChannel {
    async fn call(&self, request: WorkerRequest) -> Result<Value, ChannelError> {
        let line = protocol::encode_request(&request)
            .map_err(|err| ChannelError::Protocol(err.to_string()))?;

        {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(ChannelError::Closed)?;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        debug!(id = request.id, operation = %request.operation, "Request sent to worker");

        let mut reader = self.reader.lock().await;
        loop {
            let Some(line) = reader.next_segment().await? else {
                return Err(ChannelError::Closed);
            };
            match protocol::decode_line(&line) {
                Ok(WorkerMessage::Response(response)) if response.id == request.id => {
                    return response.into_result().map_err(ChannelError::Rejected);
                }
                Ok(WorkerMessage::Response(response)) => {
                    warn!(
                        expected = request.id,
                        received = response.id,
                        "Discarding response for a request that is not in flight"
                    );
                }
                Ok(WorkerMessage::Ready) => debug!("Ignoring repeated ready message"),
                Err(_) => skip_output(&line),
            }
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, "Worker stdin already closed");
            }
        }
    }
}

fn skip_output(line: &[u8]) {
    debug!(line = %String::from_utf8_lossy(line), "Skipping non-protocol worker output");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn request(id: u64, operation: &str) -> WorkerRequest {
        WorkerRequest {
            id,
            operation: operation.to_string(),
            params: Vec::new(),
        }
    }

    #[tokio::test]
    async fn call_skips_noise_and_stale_responses() {
        let (host_out, worker_in) = duplex(4096);
        let (mut worker_out, host_in) = duplex(4096);
        let channel = StdioChannel::new(host_out, host_in);

        let worker = tokio::spawn(async move {
            let mut lines = BufReader::new(worker_in).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert!(line.contains("\"operation\":\"fetchWalletBalance\""));
            worker_out
                .write_all(b"loading wallet...\n{\"type\":\"response\",\"id\":99,\"result\":0}\n{\"type\":\"response\",\"id\":1,\"result\":42}\n")
                .await
                .unwrap();
        });

        let value = channel.call(request(1, "fetchWalletBalance")).await.unwrap();
        assert_eq!(value, json!(42));
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn call_skips_output_that_is_not_utf8() {
        let (host_out, _worker_in) = duplex(4096);
        let (mut worker_out, host_in) = duplex(4096);
        worker_out
            .write_all(b"\xff\xfe garbage\n{\"type\":\"response\",\"id\":1,\"result\":42}\n")
            .await
            .unwrap();
        let channel = StdioChannel::new(host_out, host_in);

        let value = channel.call(request(1, "fetchWalletBalance")).await.unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn worker_error_is_rejected() {
        let (host_out, _worker_in) = duplex(4096);
        let (mut worker_out, host_in) = duplex(4096);
        worker_out
            .write_all(b"{\"type\":\"response\",\"id\":5,\"error\":\"wallet locked\"}\n")
            .await
            .unwrap();
        let channel = StdioChannel::new(host_out, host_in);

        let err = channel.call(request(5, "fetchSendData")).await.unwrap_err();
        assert_eq!(err, ChannelError::Rejected("wallet locked".into()));
    }

    #[tokio::test]
    async fn eof_while_waiting_is_closed() {
        let (host_out, _worker_in) = duplex(4096);
        let (worker_out, host_in) = duplex(4096);
        drop(worker_out);
        let channel = StdioChannel::new(host_out, host_in);

        let err = channel.call(request(1, "fetchWalletBalance")).await.unwrap_err();
        assert_eq!(err, ChannelError::Closed);
    }

    #[tokio::test]
    async fn call_after_close_fails_fast() {
        let (host_out, _worker_in) = duplex(4096);
        let (_worker_out, host_in) = duplex(4096);
        let channel = StdioChannel::new(host_out, host_in);
        channel.close().await;

        let err = channel.call(request(1, "fetchWalletBalance")).await.unwrap_err();
        assert_eq!(err, ChannelError::Closed);
    }

    #[tokio::test]
    async fn handshake_waits_for_ready() {
        let (host_out, _worker_in) = duplex(4096);
        let (mut worker_out, host_in) = duplex(4096);
        worker_out
            .write_all(b"booting\n\xc3\x28 sync\n{\"type\":\"ready\"}\n")
            .await
            .unwrap();
        let channel = StdioChannel::new(host_out, host_in);
        channel.handshake(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn handshake_times_out() {
        let (host_out, _worker_in) = duplex(4096);
        let (_worker_out, host_in) = duplex(4096);
        let channel = StdioChannel::new(host_out, host_in);
        let err = channel
            .handshake(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::Timeout { .. }));
    }
}
