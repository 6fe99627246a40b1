//! Shared line-delimited JSON-RPC client for the reference agent and
//! store-process binaries (spec.md §4.1, §4.6). The controller answers
//! exactly one response per request in the order received, so unlike a
//! pipelined client this only needs to serialize calls behind a mutex
//! rather than correlate by `id` -- modeled on the connect/split/loop
//! shape of the Swank client, simplified for a protocol with no
//! concurrent in-flight requests per connection.
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use matrix_core::rpc::LineJsonCodec;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("connection closed by controller")]
    Disconnected,
    #[error("rpc error {code}: {message}")]
    RpcError { code: i64, message: String },
}

/// A connection to one controller's RPC socket.
pub struct Client {
    framed: Mutex<Framed<TcpStream, LineJsonCodec>>,
    next_id: AtomicU64,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        Ok(Client {
            framed: Mutex::new(Framed::new(stream, LineJsonCodec::new())),
            next_id: AtomicU64::new(1),
        })
    }

    /// Invoke `method` with positional `params` and return its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        let line = serde_json::to_string(&request).expect("request always serializes");

        let mut framed = self.framed.lock().await;
        framed
            .send(line)
            .await
            .map_err(|e| ClientError::SendFailed(e.to_string()))?;

        let response_line = framed
            .next()
            .await
            .ok_or(ClientError::Disconnected)?
            .map_err(|e| ClientError::ReceiveFailed(e.to_string()))?;

        let response: Value = serde_json::from_str(&response_line)
            .map_err(|e| ClientError::ReceiveFailed(e.to_string()))?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            return Err(ClientError::RpcError {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn echo_server(listener: TcpListener, response: Value) {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let _request_line = lines.next_line().await.unwrap().unwrap();
        let line = serde_json::to_string(&response).unwrap();
        write_half.write_all(line.as_bytes()).await.unwrap();
        write_half.write_all(b"\n").await.unwrap();
    }

    #[tokio::test]
    async fn call_returns_result_on_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = json!({"jsonrpc": "2.0", "result": {"cur_round": 3}, "id": 1});
        tokio::spawn(echo_server(listener, response));

        let client = Client::connect(&addr.to_string()).await.unwrap();
        let result = client.call("can_we_start_yet", json!([])).await.unwrap();
        assert_eq!(result["cur_round"], 3);
    }

    #[tokio::test]
    async fn call_surfaces_rpc_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = json!({
            "jsonrpc": "2.0",
            "error": {"code": -32602, "message": "missing agentproc_id"},
            "id": 1,
        });
        tokio::spawn(echo_server(listener, response));

        let client = Client::connect(&addr.to_string()).await.unwrap();
        let err = client.call("get_agentproc_seed", json!([])).await.unwrap_err();
        match err {
            ClientError::RpcError { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "missing agentproc_id");
            }
            other => panic!("expected RpcError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_reports_disconnect_when_server_closes_without_replying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let client = Client::connect(&addr.to_string()).await.unwrap();
        let err = client.call("can_we_start_yet", json!([])).await.unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));
    }
}
