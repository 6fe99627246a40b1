//! TCP front door for agent and store-process connections (spec.md
//! §4.6). One task per connection, one line-delimited JSON-RPC request
//! at a time; each connection keeps its own `ConnectionState` so a
//! store process's claimed per-store receiver survives across calls.
use crate::{handlers, AppState, ConnectionState};
use futures::{SinkExt, StreamExt};
use matrix_core::rpc::{parse_request, LineJsonCodec, RpcResponse};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

pub async fn run(state: Arc<AppState>, bind_addr: std::net::SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(node = %state.node, addr = %bind_addr, "controller listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, socket).await {
                warn!(%peer, error = %e, "connection closed with error");
            } else {
                debug!(%peer, "connection closed");
            }
        });
    }
}

async fn handle_connection(state: Arc<AppState>, socket: TcpStream) -> std::io::Result<()> {
    let mut framed = Framed::new(socket, LineJsonCodec::new());
    let mut conn = ConnectionState::default();

    while let Some(line) = framed.next().await {
        let line = line?;
        let response = match parse_request(&line) {
            Ok(req) => handlers::dispatch(&state, &mut conn, req).await,
            Err(resp) => Some(resp),
        };
        if let Some(response) = response {
            let encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
                error!(error = %e, "failed to encode response, sending internal error");
                serde_json::to_string(&RpcResponse::error(
                    RpcResponse::INTERNAL_ERROR,
                    "internal encoding error",
                    None,
                ))
                .expect("error response always encodes")
            });
            framed.send(encoded).await?;
        }
    }
    Ok(())
}
