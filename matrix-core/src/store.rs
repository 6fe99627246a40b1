//! State-store adapter (spec.md §4.3, §7, §9).
//!
//! `StateStore` is the capability set a pluggable backend implements.
//! `StoreAdapter` wraps any such backend and owns the "any fault ⇒ exit"
//! policy: a failing `handle_events`/`flush`/`close` call is logged
//! with the `StateStoreError` tag and the process exits immediately,
//! because the core treats store faults as unrecoverable -- a retry
//! or partial-apply here would let cluster state diverge.
use crate::error::MatrixError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The capability set a pluggable state-store backend implements.
/// Called only from a store process's single consuming loop (never
/// concurrently), so implementations need not be internally thread-safe.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn handle_events(&self, events: &[Value]) -> StoreResult<()>;
    async fn flush(&self) -> StoreResult<()>;
    async fn close(&self) -> StoreResult<()>;
}

/// Wraps a `StateStore` so any failure terminates the process.
/// `close` is idempotent: once called, later calls are no-ops.
pub struct StoreAdapter<S: StateStore> {
    inner: S,
    closed: AtomicBool,
}

impl<S: StateStore> StoreAdapter<S> {
    pub fn new(inner: S) -> Self {
        StoreAdapter {
            inner,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn handle_events(&self, events: &[Value]) {
        if let Err(e) = self.inner.handle_events(events).await {
            fatal(&e, "handle_events");
        }
    }

    pub async fn flush(&self) {
        if let Err(e) = self.inner.flush().await {
            fatal(&e, "flush");
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.inner.close().await {
            fatal(&e, "close");
        }
    }
}

/// Exit policy shared by every fault path: wrap the backend's error as
/// a `MatrixError::StoreAdapter` (spec.md §7's `StoreAdapterError` kind),
/// log it with the distinctive `StateStoreError` tag, then exit(1).
/// Never a panic -- an unwind across an async boundary here would leave
/// the per-store queue in an inconsistent state for no benefit.
fn fatal(e: &StoreError, op: &str) -> ! {
    let wrapped = MatrixError::StoreAdapter(e.to_string());
    error!(tag = "StateStoreError", operation = op, error = %wrapped, "state store adapter failed");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct RecordingStore {
        events: Arc<Mutex<Vec<Value>>>,
        closes: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl StateStore for RecordingStore {
        async fn handle_events(&self, events: &[Value]) -> StoreResult<()> {
            self.events.lock().await.extend_from_slice(events);
            Ok(())
        }
        async fn flush(&self) -> StoreResult<()> {
            Ok(())
        }
        async fn close(&self) -> StoreResult<()> {
            *self.closes.lock().await += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let closes = Arc::new(Mutex::new(0));
        let store = RecordingStore {
            events: Arc::new(Mutex::new(vec![])),
            closes: closes.clone(),
        };
        let adapter = StoreAdapter::new(store);
        adapter.close().await;
        adapter.close().await;
        assert_eq!(*closes.lock().await, 1);
    }

    #[tokio::test]
    async fn handle_events_forwards_to_backend() {
        let events = Arc::new(Mutex::new(vec![]));
        let store = RecordingStore {
            events: events.clone(),
            closes: Arc::new(Mutex::new(0)),
        };
        let adapter = StoreAdapter::new(store);
        adapter.handle_events(&[Value::from(1), Value::from(2)]).await;
        assert_eq!(events.lock().await.len(), 2);
    }
}
