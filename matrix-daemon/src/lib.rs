//! The controller daemon: the TCP-facing RPC server (C6), the AMQP
//! listener that drives the round barrier from peer notifications
//! (C5's network half), and the event logger binary (C7).
pub mod amqp_listener;
pub mod handlers;
pub mod server;
pub mod share_events;

use matrix_core::broker::BrokerChannel;
use matrix_core::config::ClusterConfig;
use matrix_core::coordinator::Coordinator;
use matrix_core::pipeline::{LocalOutboundSender, PerStoreQueueReceiver, PerStoreQueues};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// State shared by every connection handler and the AMQP listener task
/// on one controller node.
pub struct AppState {
    pub node: String,
    pub node_index: usize,
    pub config: ClusterConfig,
    pub coordinator: Arc<Coordinator>,
    pub store_queues: Arc<PerStoreQueues>,
    pub local_outbound: LocalOutboundSender,
    pub broker: Arc<BrokerChannel>,
    pub store_receiver_pool: Arc<StoreReceiverPool>,
    /// Flipped to `true` once the coordinator reports
    /// `RoundAdvance::AdvanceToSimEnd`, so `bin/controller.rs`'s main
    /// loop can stop accepting connections and close the broker
    /// (spec.md §4.6). A `watch` channel (rather than `Notify`) so the
    /// signal survives even if it fires before anyone is watching yet.
    pub simend: watch::Sender<bool>,
}

/// Per-connection state the RPC handlers mutate across calls on the
/// same socket: a store-process connection claims exactly one
/// per-store receiver via its first `get_events` call and keeps it for
/// the life of the connection.
#[derive(Default)]
pub struct ConnectionState {
    pub store_rx: Option<PerStoreQueueReceiver>,
}

/// Pool of not-yet-claimed per-store receivers, indexed by storeproc id.
pub struct StoreReceiverPool {
    pub receivers: Mutex<Vec<Option<PerStoreQueueReceiver>>>,
}

impl StoreReceiverPool {
    pub fn new(receivers: Vec<PerStoreQueueReceiver>) -> Self {
        StoreReceiverPool {
            receivers: Mutex::new(receivers.into_iter().map(Some).collect()),
        }
    }

    /// Take ownership of the receiver for `storeproc_id`. Returns
    /// `None` if the id is out of range or already claimed by another
    /// connection.
    pub async fn claim(&self, storeproc_id: usize) -> Option<PerStoreQueueReceiver> {
        let mut receivers = self.receivers.lock().await;
        receivers.get_mut(storeproc_id)?.take()
    }
}
