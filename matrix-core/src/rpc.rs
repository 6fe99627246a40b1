//! Line-delimited JSON-RPC 2.0 (spec.md §4.1, §6).
//!
//! One JSON object per line on TCP; the same request/response shapes
//! are reused verbatim as AMQP notification bodies (`id` absent).
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Source says 16 GiB; we cap considerably lower and document the
/// overflow behaviour (error + close) per spec.md §9.
pub const MAX_LINE_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Positional or named params as a convenient lookup, per spec.md
    /// §4.1 ("params may be ... an array (positional), or an object
    /// (named)").
    pub fn param(&self, index: usize, name: &str) -> Option<&Value> {
        match &self.params {
            Some(Value::Array(arr)) => arr.get(index),
            Some(Value::Object(map)) => map.get(name),
            _ => None,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    pub fn success(result: Value, id: Option<Value>) -> Self {
        RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(code: i64, message: impl Into<String>, id: Option<Value>) -> Self {
        RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcErrorBody {
                code,
                message: message.into(),
            }),
            id,
        }
    }

    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Parse one line of request JSON, producing an error response on any
/// malformation (spec.md §4.1's parse contract) instead of propagating
/// the parse failure to the caller.
pub fn parse_request(line: &str) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| RpcResponse::error(RpcResponse::PARSE_ERROR, e.to_string(), None))?;
    let obj = value
        .as_object()
        .ok_or_else(|| RpcResponse::error(RpcResponse::INVALID_REQUEST, "not an object", None))?;
    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let id = obj.get("id").cloned();
    if jsonrpc != "2.0" {
        return Err(RpcResponse::error(
            RpcResponse::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
            id,
        ));
    }
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RpcResponse::error(RpcResponse::INVALID_REQUEST, "missing string method", id.clone())
        })?
        .to_string();
    let params = obj.get("params").cloned();
    Ok(RpcRequest {
        jsonrpc: jsonrpc.to_string(),
        method,
        params,
        id,
    })
}

/// Frames newline-delimited JSON values over a byte stream, used for
/// both the TCP agent/store connections and tests of the wire format.
/// Modeled directly on the length-delimited `Decoder`/`Encoder` pair
/// used for the Lisp session protocol elsewhere in this codebase,
/// substituting a `\n` terminator for a hex length header.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineJsonCodec {
    max_len: usize,
}

impl LineJsonCodec {
    pub fn new() -> Self {
        LineJsonCodec {
            max_len: MAX_LINE_LEN,
        }
    }
}

impl Decoder for LineJsonCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(pos) = src.iter().position(|&b| b == b'\n') {
            if pos > self.max_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line exceeds max length {}", self.max_len),
                ));
            }
            let line = src.split_to(pos);
            src.advance(1); // consume the '\n'
            let s = String::from_utf8(line.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(s))
        } else if src.len() > self.max_len {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds max length {} with no terminator", self.max_len),
            ))
        } else {
            Ok(None)
        }
    }
}

impl Encoder<String> for LineJsonCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_and_named_params() {
        let req = parse_request(r#"{"jsonrpc":"2.0","method":"m","params":[1,2],"id":1}"#).unwrap();
        assert_eq!(req.param(1, "x").unwrap(), &Value::from(2));

        let req =
            parse_request(r#"{"jsonrpc":"2.0","method":"m","params":{"x":5},"id":null}"#).unwrap();
        assert_eq!(req.param(0, "x").unwrap(), &Value::from(5));
    }

    #[test]
    fn notification_has_no_id() {
        let req = parse_request(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn rejects_wrong_version() {
        let err = parse_request(r#"{"jsonrpc":"1.0","method":"m","id":1}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, RpcResponse::INVALID_REQUEST);
    }

    #[test]
    fn rejects_missing_method() {
        let err = parse_request(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.error.unwrap().code, RpcResponse::INVALID_REQUEST);
    }

    #[test]
    fn codec_round_trips_a_line() {
        let mut codec = LineJsonCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(r#"{"jsonrpc":"2.0","method":"x"}"#.to_string(), &mut buf)
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, r#"{"jsonrpc":"2.0","method":"x"}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn codec_buffers_partial_line() {
        let mut codec = LineJsonCodec::new();
        let mut buf = BytesMut::from(&b"{\"jsonrpc\""[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b":\"2.0\"}\n");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, r#"{"jsonrpc":"2.0"}"#);
    }
}
