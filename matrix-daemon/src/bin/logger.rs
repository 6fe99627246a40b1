//! Event logger (spec.md §2 C7, §4.7): a broker-only consumer that
//! writes every event from every node to a gzip'd JSON-lines file and
//! exits once it has observed `controller_finished` enough times to
//! know the simulation reached SIMEND.
//!
//! Reuses `Coordinator`'s dedup-and-threshold counting with
//! `num_agentprocs = 0` -- the logger never calls `can_we_start_yet`,
//! it only rides `on_controller_finished`'s round-advance detection.
use clap::Parser;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_lite::StreamExt;
use matrix_core::broker::{BrokerChannel, BrokerConfig};
use matrix_core::config::ClusterConfig;
use matrix_core::coordinator::{Coordinator, RoundAdvance};
use matrix_core::rpc::RpcRequest;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "matrix-logger",
    about = "Durable event log for a Matrix simulation run",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// Output path for the gzip'd JSON-lines event log.
    #[arg(short, long, value_name = "PATH", default_value = "matrix-events.jsonl.gz")]
    output: PathBuf,

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
        tracing::error!(error = %e, "logger exiting with error");
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn run(args: Args) -> matrix_core::MatrixResult<()> {
    let config = ClusterConfig::load(&args.config)?;

    let broker = BrokerChannel::connect(&BrokerConfig {
        host: config.rabbitmq_host.clone(),
        port: config.rabbitmq_port,
        username: config.rabbitmq_username.clone(),
        password: config.rabbitmq_password.clone(),
        exchange: config.event_exchange.clone(),
        connect_timeout: Duration::from_secs(30),
    })
    .await?;

    let consumer = broker.declare_receive_queue("matrix-logger").await?;

    let base_start = config.start_timestamp()?;
    let round_time = config.round_time_secs()?;
    let coordinator = Coordinator::new(
        0,
        config.num_controllers() as u32,
        config.num_rounds,
        base_start,
        round_time,
    );

    let file = std::fs::File::create(&args.output)
        .map_err(|e| matrix_core::MatrixError::Config(format!("creating {:?}: {e}", args.output)))?;
    let mut encoder = GzEncoder::new(file, Compression::default());

    info!(output = %args.output.display(), "event logger started");

    let mut consumer = consumer;
    while let Some(delivery) = consumer.next().await {
        let delivery = delivery.map_err(matrix_core::MatrixError::from)?;
        match serde_json::from_slice::<RpcRequest>(&delivery.data) {
            Ok(notification) => {
                let done = handle_notification(&coordinator, &mut encoder, &notification).await?;
                delivery
                    .ack(lapin::options::BasicAckOptions::default())
                    .await
                    .map_err(matrix_core::MatrixError::from)?;
                if done {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "malformed notification, skipping"),
        }
    }

    encoder
        .finish()
        .map_err(|e| matrix_core::MatrixError::Config(format!("flushing event log: {e}")))?;
    info!("event logger finished: simulation reached SIMEND");
    Ok(())
}

/// Returns `true` once every controller has reported finishing the
/// terminal round.
async fn handle_notification(
    coordinator: &Coordinator,
    encoder: &mut GzEncoder<std::fs::File>,
    notification: &RpcRequest,
) -> matrix_core::MatrixResult<bool> {
    match notification.method.as_str() {
        "store_events" => {
            if let Some(events) = notification.param(1, "events").and_then(|v| v.as_array()) {
                write_events(encoder, events)?;
            }
            Ok(false)
        }
        "controller_finished" => {
            let node = notification.param(0, "node").and_then(Value::as_str).unwrap_or("?");
            let advance = coordinator.on_controller_finished(node).await;
            Ok(advance == RoundAdvance::AdvanceToSimEnd)
        }
        _ => Ok(false),
    }
}

fn write_events(encoder: &mut GzEncoder<std::fs::File>, events: &[Value]) -> matrix_core::MatrixResult<()> {
    for event in events {
        writeln!(encoder, "{event}")
            .map_err(|e| matrix_core::MatrixError::Config(format!("writing event log: {e}")))?;
    }
    Ok(())
}
