//! RPC method table for the controller's agent/store-facing socket
//! (spec.md §4.1, §4.6).
use crate::{AppState, ConnectionState};
use matrix_core::coordinator::{Arrival, ArrivalEffect};
use matrix_core::pipeline::{chunk_events, EventBatch, PerStoreItem};
use matrix_core::rpc::{RpcRequest, RpcResponse};
use matrix_core::seed::agentproc_seed;
use serde_json::{json, Value};
use tracing::warn;

/// Dispatch one parsed request to its handler, returning the response
/// to write back (`None` for notifications, which this socket does not
/// currently accept but which the method table still tolerates).
pub async fn dispatch(
    state: &AppState,
    conn: &mut ConnectionState,
    req: RpcRequest,
) -> Option<RpcResponse> {
    let id = req.id.clone();
    let result = match req.method.as_str() {
        "get_agentproc_seed" => get_agentproc_seed(state, &req),
        "can_we_start_yet" => can_we_start_yet(state).await,
        "register_events" => register_events(state, &req).await,
        "get_events" => get_events(state, conn, &req).await,
        other => Err(RpcResponse::error(
            RpcResponse::METHOD_NOT_FOUND,
            format!("unknown method {other:?}"),
            id.clone(),
        )),
    };
    if req.is_notification() {
        return None;
    }
    Some(match result {
        Ok(value) => RpcResponse::success(value, id),
        Err(resp) => resp,
    })
}

fn get_agentproc_seed(state: &AppState, req: &RpcRequest) -> Result<Value, RpcResponse> {
    let agentproc_id = req
        .param(0, "agentproc_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            RpcResponse::error(RpcResponse::INVALID_PARAMS, "missing agentproc_id", req.id.clone())
        })? as usize;

    let num_agentprocs = *state.config.num_agentprocs.get(&state.node).unwrap_or(&0) as usize;
    if agentproc_id >= num_agentprocs {
        return Err(RpcResponse::error(
            RpcResponse::INVALID_PARAMS,
            format!("agentproc_id {agentproc_id} out of range for node {}", state.node),
            req.id.clone(),
        ));
    }
    let seed = agentproc_seed(
        state.config.root_seed,
        state.config.num_controllers(),
        state.node_index,
        num_agentprocs,
        agentproc_id,
    );
    Ok(json!(seed))
}

async fn can_we_start_yet(state: &AppState) -> Result<Value, RpcResponse> {
    match state.coordinator.can_we_start_yet().await {
        Arrival::AlreadyEnded => Ok(round_info_json(-1, -1, -1)),
        Arrival::Parked { effect, mut rx } => {
            if effect == ArrivalEffect::PublishFinished {
                publish_finished(state).await;
            }
            match rx.recv().await {
                Ok(info) => Ok(round_info_json(info.cur_round, info.start_time, info.end_time)),
                Err(_) => Ok(round_info_json(-1, -1, -1)),
            }
        }
    }
}

/// Shared by `can_we_start_yet`'s arrival effect and the zero-agent
/// trip driven from the AMQP listener: wait for every locally produced
/// event to reach the broker, then announce this node finished the
/// round (spec.md §4.5's causal-order requirement).
pub async fn publish_finished(state: &AppState) {
    state.local_outbound.flush().await;
    let notification = RpcRequest::notification("controller_finished", json!({"node": state.node}));
    if let Err(e) = state.broker.publish_notification(&notification).await {
        warn!(error = %e, "failed to publish controller_finished");
    }
}

fn round_info_json(cur_round: i64, start_time: i64, end_time: i64) -> Value {
    json!({"cur_round": cur_round, "start_time": start_time, "end_time": end_time})
}

async fn register_events(state: &AppState, req: &RpcRequest) -> Result<Value, RpcResponse> {
    let events: EventBatch = req
        .param(0, "events")
        .and_then(|v| v.as_array())
        .cloned()
        .ok_or_else(|| {
            RpcResponse::error(RpcResponse::INVALID_PARAMS, "missing events array", req.id.clone())
        })?;

    for chunk in chunk_events(events, state.config.chunk_size) {
        state.store_queues.broadcast_events(chunk.clone());
        state.local_outbound.push(chunk);
    }
    Ok(Value::Null)
}

async fn get_events(
    state: &AppState,
    conn: &mut ConnectionState,
    req: &RpcRequest,
) -> Result<Value, RpcResponse> {
    if conn.store_rx.is_none() {
        let storeproc_id = req
            .param(0, "storeproc_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                RpcResponse::error(RpcResponse::INVALID_PARAMS, "missing storeproc_id", req.id.clone())
            })? as usize;
        conn.store_rx = Some(
            state
                .store_receiver_pool
                .claim(storeproc_id)
                .await
                .ok_or_else(|| {
                    RpcResponse::error(
                        RpcResponse::INVALID_PARAMS,
                        format!("storeproc_id {storeproc_id} unknown or already claimed"),
                        req.id.clone(),
                    )
                })?,
        );
    }

    let rx = conn.store_rx.as_mut().expect("just populated above");
    match rx.recv().await {
        Some(PerStoreItem::Events(events)) => Ok(json!({"code": "EVENTS", "events": events})),
        Some(PerStoreItem::Flush) => Ok(json!({"code": "FLUSH"})),
        Some(PerStoreItem::SimEnd) => Ok(json!({"code": "SIMEND"})),
        None => Ok(json!({"code": "SIMEND"})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_info_json_shape() {
        let v = round_info_json(3, 100, 160);
        assert_eq!(v["cur_round"], 3);
        assert_eq!(v["start_time"], 100);
        assert_eq!(v["end_time"], 160);
    }
}
