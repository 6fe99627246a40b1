//! Error types shared by every Matrix component.
use thiserror::Error;

/// Result type used throughout `matrix-core`.
pub type MatrixResult<T> = Result<T, MatrixError>;

/// The five error kinds from the coordination core's error design.
///
/// `StoreAdapterError`, `BrokerConnectError`, and `BrokerTransientError`
/// are fatal by contract: the caller logs and exits rather than retrying.
/// `ProtocolError` is surfaced to the RPC peer and never fatal.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("state store adapter error: {0}")]
    StoreAdapter(String),

    #[error("broker connect error: {0}")]
    BrokerConnect(String),

    #[error("broker transient error: {0}")]
    BrokerTransient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl MatrixError {
    /// Process exit code for this error, per spec.md §6 "Exit codes".
    pub fn exit_code(&self) -> i32 {
        match self {
            MatrixError::Protocol(_) => 0,
            _ => 1,
        }
    }
}
