//! Newline-delimited JSON messages exchanged with the worker process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RequestId = u64;

/// Host to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Request(WorkerRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: RequestId,
    pub operation: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Worker to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready,
    Response(WorkerResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl WorkerResponse {
    /// An `error` field wins over `result`; a missing result is `null`.
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

pub fn encode_request(request: &WorkerRequest) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(&HostMessage::Request(request.clone()))?;
    line.push('\n');
    Ok(line)
}

pub fn decode_message(line: &str) -> serde_json::Result<WorkerMessage> {
    decode_line(line.as_bytes())
}

/// Decode one raw output line. Worker output is not guaranteed to be UTF-8.
pub fn decode_line(line: &[u8]) -> serde_json::Result<WorkerMessage> {
    serde_json::from_slice(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_line_shape() {
        let line = encode_request(&WorkerRequest {
            id: 7,
            operation: "fetchWalletTxns".into(),
            params: vec![json!(2), json!(10), json!(false)],
        })
        .unwrap();

        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({"type": "request", "id": 7, "operation": "fetchWalletTxns", "params": [2, 10, false]})
        );
    }

    #[test]
    fn decodes_ready_and_responses() {
        assert_eq!(decode_message("{\"type\":\"ready\"}\n").unwrap(), WorkerMessage::Ready);

        let ok = decode_message(r#"{"type":"response","id":3,"result":{"balance":12.5}}"#).unwrap();
        let WorkerMessage::Response(ok) = ok else {
            panic!("expected response");
        };
        assert_eq!(ok.into_result(), Ok(json!({"balance": 12.5})));

        let err = decode_message(r#"{"type":"response","id":4,"error":"insufficient funds"}"#).unwrap();
        let WorkerMessage::Response(err) = err else {
            panic!("expected response");
        };
        assert_eq!(err.into_result(), Err("insufficient funds".to_string()));
    }

    #[test]
    fn response_without_result_is_null() {
        let response = WorkerResponse {
            id: 1,
            error: None,
            result: None,
        };
        assert_eq!(response.into_result(), Ok(Value::Null));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_message("starting defid v1.2").is_err());
    }
}
