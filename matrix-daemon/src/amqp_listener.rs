//! Consumes the fanout exchange and drives the round barrier and the
//! per-store queues from both this node's own and peers' notifications
//! (spec.md §4.2, §4.4, §4.5). Every `store_events`/`controller_finished`
//! message a node publishes round-trips back through its own bound
//! queue, which is what lets `Coordinator::on_controller_finished`
//! treat "a peer reported in" and "we reported in" identically.
use crate::handlers::publish_finished;
use crate::AppState;
use matrix_core::broker::BrokerChannel;
use matrix_core::coordinator::RoundAdvance;
use matrix_core::pipeline::EventBatch;
use matrix_core::rpc::RpcRequest;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Run until the broker connection drops. Never returns `Ok`; any
/// return is an error the caller should treat as fatal (spec.md §7:
/// the core does not reconnect a dropped broker session mid-run).
pub async fn run(state: Arc<AppState>) -> matrix_core::MatrixResult<()> {
    let consumer = state.broker.declare_receive_queue(&state.node).await?;
    let state_for_closure = state.clone();
    BrokerChannel::run_consumer(consumer, move |notification| {
        let state = state_for_closure.clone();
        async move {
            handle_notification(&state, notification).await;
        }
    })
    .await
}

async fn handle_notification(state: &Arc<AppState>, notification: RpcRequest) {
    match notification.method.as_str() {
        "store_events" => handle_store_events(state, &notification),
        "controller_finished" => handle_controller_finished(state, &notification).await,
        other => warn!(method = other, "unrecognized broker notification"),
    }
}

fn handle_store_events(state: &Arc<AppState>, notification: &RpcRequest) {
    let origin = notification.param(0, "origin").and_then(Value::as_str);
    if origin == Some(state.node.as_str()) {
        // This node already fed its own store queues directly from
        // `register_events`; the broker round-trip only replicates to peers.
        return;
    }
    let events: Option<EventBatch> = notification
        .param(1, "events")
        .and_then(|v| v.as_array())
        .cloned();
    match events {
        Some(events) => state.store_queues.broadcast_events(events),
        None => warn!("store_events notification missing events array"),
    }
}

async fn handle_controller_finished(state: &Arc<AppState>, notification: &RpcRequest) {
    let node = match notification.param(0, "node").and_then(Value::as_str) {
        Some(n) => n.to_string(),
        None => {
            warn!("controller_finished notification missing node");
            return;
        }
    };
    let advance = state.coordinator.on_controller_finished(&node).await;
    apply_round_advance(state, advance).await;
}

/// Apply the side effects a `RoundAdvance` implies, then release any
/// parked callers. Also called once at startup so a zero-agent node
/// trips its own local condition without ever receiving a
/// `can_we_start_yet` call.
pub async fn apply_round_advance(state: &Arc<AppState>, advance: RoundAdvance) {
    match advance {
        RoundAdvance::None => return,
        RoundAdvance::Advance => {
            state.store_queues.broadcast_flush();
        }
        RoundAdvance::AdvanceToSimEnd => {
            state.store_queues.broadcast_flush();
            state.store_queues.broadcast_simend();
            state.local_outbound.terminate();
            let _ = state.simend.send(true);
        }
    }
    state.coordinator.release().await;
    trip_if_no_agents(state).await;
}

/// Drive the zero-agent trip condition once: if this node has no local
/// agent processes, it must announce `controller_finished` itself
/// rather than waiting for a `can_we_start_yet` call that will never
/// arrive (spec.md §8).
pub async fn trip_if_no_agents(state: &Arc<AppState>) {
    if state.coordinator.trip_if_no_agents().await == matrix_core::coordinator::ArrivalEffect::PublishFinished {
        publish_finished(state).await;
    }
}
