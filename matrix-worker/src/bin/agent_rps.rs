//! Reference agent process (spec.md §2 C8): plays one round of
//! rock-paper-scissors per barrier crossing, driving the full RPC
//! contract an agent process is expected to exercise.
use clap::Parser;
use matrix_worker::client::Client;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MOVES: [&str; 3] = ["rock", "paper", "scissors"];

#[derive(Parser, Debug)]
#[command(name = "matrix-agent-rps", about = "Reference rock-paper-scissors agent")]
struct Args {
    /// `host:port` of the local controller.
    #[arg(short, long, value_name = "ADDR")]
    controller: String,

    /// This agent's index among its node's local agent processes.
    #[arg(short, long, value_name = "ID")]
    agentproc_id: usize,

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

    let client = Client::connect(&args.controller).await?;

    let seed = client
        .call("get_agentproc_seed", json!([args.agentproc_id]))
        .await?
        .as_u64()
        .ok_or_else(|| anyhow::anyhow!("get_agentproc_seed did not return an integer"))?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    info!(agentproc_id = args.agentproc_id, seed, "agent started");

    loop {
        let round_info = client.call("can_we_start_yet", json!([])).await?;
        let cur_round = round_info
            .get("cur_round")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(-1);
        if cur_round == -1 {
            info!(agentproc_id = args.agentproc_id, "simulation ended");
            break;
        }

        let my_move = MOVES[rng.gen_range(0..MOVES.len())];
        let event = json!({
            "agentproc_id": args.agentproc_id,
            "round": cur_round,
            "move": my_move,
        });
        if let Err(e) = client.call("register_events", json!([[event]])).await {
            warn!(error = %e, "register_events failed");
        }
    }
    Ok(())
}
