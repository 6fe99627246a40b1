//! Matrix CLI: thin operator-facing wrapper around cluster config
//! validation, seed-stream debugging, and launching a controller.
use clap::{Parser, Subcommand};
use matrix_core::config::ClusterConfig;
use matrix_core::seed::agentproc_seed;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "matrix")]
#[command(about = "Cluster configuration and launch helper for the Matrix coordination platform")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Launch a controller for one node (execs `matrix-controller`)
    Run {
        /// Path to the cluster YAML configuration
        config: PathBuf,

        /// Node name to run, as listed in sim_nodes
        #[arg(short, long)]
        node: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate a cluster config, reporting any error
    Validate {
        /// Path to the cluster YAML configuration
        config: PathBuf,
    },

    /// Print the derived seed for one agent process
    Seed {
        /// Path to the cluster YAML configuration
        config: PathBuf,

        /// Node the agent process belongs to
        #[arg(short, long)]
        node: String,

        /// Agent process index within that node
        #[arg(short, long)]
        agentproc_id: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    match args.command {
        Commands::Config { command } => match command {
            ConfigCommands::Validate { config } => {
                match ClusterConfig::load(&config) {
                    Ok(cfg) => {
                        println!(
                            "OK: {} node(s), {} round(s)",
                            cfg.num_controllers(),
                            cfg.num_rounds
                        );
                    }
                    Err(e) => {
                        eprintln!("INVALID: {e}");
                        std::process::exit(e.exit_code());
                    }
                }
            }
            ConfigCommands::Seed { config, node, agentproc_id } => {
                let cfg = ClusterConfig::load(&config)?;
                let node_index = cfg
                    .node_index(&node)
                    .ok_or_else(|| anyhow::anyhow!("node {node:?} not present in sim_nodes"))?;
                let num_agentprocs = *cfg.num_agentprocs.get(&node).unwrap_or(&0) as usize;
                let seed = agentproc_seed(
                    cfg.root_seed,
                    cfg.num_controllers(),
                    node_index,
                    num_agentprocs,
                    agentproc_id,
                );
                println!("{seed}");
            }
        },
        Commands::Run { config, node } => {
            let status = std::process::Command::new("matrix-controller")
                .arg("--config")
                .arg(&config)
                .arg("--node")
                .arg(&node)
                .status()?;
            std::process::exit(status.code().unwrap_or(1));
        }
    }
    Ok(())
}
