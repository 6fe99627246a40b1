//! Matrix controller daemon: one process per simulation node (spec.md
//! §2 C6). Owns the round barrier, the event pipeline, and the broker
//! connection for its node.
use clap::Parser;
use matrix_core::broker::{BrokerChannel, BrokerConfig};
use matrix_core::config::ClusterConfig;
use matrix_core::coordinator::Coordinator;
use matrix_core::pipeline::{local_outbound_channel, PerStoreQueues};
use matrix_daemon::{amqp_listener, server, share_events, AppState, StoreReceiverPool};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "matrix-controller",
    about = "Round-based coordination controller for one Matrix simulation node",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Path to the cluster YAML configuration.
    #[arg(short, long, value_name = "PATH")]
    config: std::path::PathBuf,

    /// This process's node name, as listed in the config's sim_nodes.
    #[arg(short, long, value_name = "NODE")]
    node: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .with_target(false)
        .init();

    if let Err(e) = run(args).await {
        error!(error = %e, "controller exiting with error");
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn run(args: Args) -> matrix_core::MatrixResult<()> {
    let config = ClusterConfig::load(&args.config)?;
    let node_index = config.node_index(&args.node).ok_or_else(|| {
        matrix_core::MatrixError::Config(format!("node {:?} not present in sim_nodes", args.node))
    })?;

    info!(node = %args.node, node_index, "loaded cluster config");

    let broker = BrokerChannel::connect(&BrokerConfig {
        host: config.rabbitmq_host.clone(),
        port: config.rabbitmq_port,
        username: config.rabbitmq_username.clone(),
        password: config.rabbitmq_password.clone(),
        exchange: config.event_exchange.clone(),
        connect_timeout: Duration::from_secs(30),
    })
    .await?;

    let num_agentprocs = *config.num_agentprocs.get(&args.node).unwrap_or(&0);
    let num_storeprocs = *config.num_storeprocs.get(&args.node).unwrap_or(&0) as usize;
    let num_controllers = config.num_controllers() as u32;
    let base_start = config.start_timestamp()?;
    let round_time = config.round_time_secs()?;

    let coordinator = Arc::new(Coordinator::new(
        num_agentprocs,
        num_controllers,
        config.num_rounds,
        base_start,
        round_time,
    ));
    let (store_queues, store_receivers) = PerStoreQueues::new(num_storeprocs);
    let (local_outbound_tx, local_outbound_rx) = local_outbound_channel();
    // Subscribed before anything can run, so a SIMEND that fires
    // synchronously inside `trip_if_no_agents` below (e.g. num_rounds =
    // 0) is still observed by `changed()` later -- unlike `Notify`, a
    // `watch` receiver never misses a send that happened before it was
    // first polled, only before it was created.
    let (simend_tx, mut simend_rx) = watch::channel(false);

    let state = Arc::new(AppState {
        node: args.node.clone(),
        node_index,
        config: config.clone(),
        coordinator,
        store_queues: Arc::new(store_queues),
        local_outbound: local_outbound_tx,
        broker: Arc::new(broker),
        store_receiver_pool: Arc::new(StoreReceiverPool::new(store_receivers)),
        simend: simend_tx,
    });

    tokio::spawn(share_events::run(state.clone(), local_outbound_rx));

    let listener_state = state.clone();
    let mut listener_handle = tokio::spawn(async move {
        if let Err(e) = amqp_listener::run(listener_state).await {
            error!(error = %e, "amqp listener terminated");
        }
    });

    // A node with no local agents never receives a can_we_start_yet
    // call, so it must trip round 1's condition itself at startup.
    amqp_listener::trip_if_no_agents(&state).await;

    let bind_addr: SocketAddr = format!("127.0.0.1:{}", config.controller_port[&args.node])
        .parse()
        .map_err(|e| matrix_core::MatrixError::Config(format!("invalid controller_port: {e}")))?;

    let server_state = state.clone();
    let mut server_handle = tokio::spawn(async move { server::run(server_state, bind_addr).await });

    tokio::select! {
        res = &mut server_handle => {
            res.map_err(|e| matrix_core::MatrixError::Protocol(e.to_string()))??;
        }
        res = &mut listener_handle => {
            res.map_err(|e| matrix_core::MatrixError::Protocol(e.to_string()))?;
        }
        _ = simend_rx.changed() => {
            info!(node = %args.node, "simulation reached SIMEND, shutting down");
        }
        _ = shutdown_signal() => {
            info!(node = %args.node, "received shutdown signal, stopping gracefully");
        }
    }

    // Graceful stop (spec.md §4.6, §5): stop accepting connections,
    // close the broker channel, then return.
    server_handle.abort();
    listener_handle.abort();
    if let Err(e) = state.broker.close().await {
        warn!(error = %e, "failed to close broker channel cleanly during shutdown");
    }
    Ok(())
}

/// Resolves once on the first SIGINT/SIGTERM/SIGHUP; any further signal
/// received afterward is logged and ignored (spec.md §5).
async fn shutdown_signal() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(signal_listener(tx));
    let _ = rx.await;
}

async fn signal_listener(tx: tokio::sync::oneshot::Sender<()>) {
    let mut tx = Some(tx);
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    #[cfg(unix)]
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("failed to install SIGHUP handler");

    loop {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
            _ = hangup.recv() => {},
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");

        match tx.take() {
            Some(tx) => {
                info!("shutdown signal received, stopping gracefully");
                let _ = tx.send(());
            }
            None => warn!("second shutdown signal received, ignoring"),
        }
    }
}
