//! Drains `local_outbound` and republishes each batch as a
//! `store_events` notification on the fanout exchange, tagged with
//! this node's name so `amqp_listener` can skip re-applying its own
//! events locally (spec.md §4.4).
use crate::AppState;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

pub async fn run(state: Arc<AppState>, mut rx: matrix_core::pipeline::LocalOutboundReceiver) {
    while let Some(batch) = rx.recv().await {
        let notification = matrix_core::rpc::RpcRequest::notification(
            "store_events",
            json!({"origin": state.node, "events": batch}),
        );
        if let Err(e) = state.broker.publish_notification(&notification).await {
            error!(error = %e, "failed to publish store_events, dropping batch");
        }
    }
    info!(node = %state.node, "share_events task finished: local_outbound terminated");
}
