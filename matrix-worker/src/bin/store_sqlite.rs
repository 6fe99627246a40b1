//! Reference SQLite-backed state-store process (spec.md §2 C8, §4.3).
//! Pulls events from its controller via `get_events` and durably
//! applies them through `matrix_core::store::StoreAdapter`, which owns
//! the "any fault exits the process" policy.
use async_trait::async_trait;
use clap::Parser;
use matrix_core::store::{StateStore, StoreAdapter, StoreError, StoreResult};
use matrix_worker::client::Client;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "matrix-store-sqlite", about = "Reference SQLite state-store process")]
struct Args {
    #[arg(short, long, value_name = "ADDR")]
    controller: String,

    /// This store process's index among its node's local store processes.
    #[arg(short, long, value_name = "ID")]
    storeproc_id: usize,

    /// SQLite DSN (`sqlite:///path/to/file.db`), from the cluster
    /// config's `state_dsn` for this node.
    #[arg(short, long, value_name = "DSN")]
    dsn: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                received_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(SqliteStore { pool })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn handle_events(&self, events: &[Value]) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        for event in events {
            sqlx::query("INSERT INTO events (payload, received_at) VALUES (?, ?)")
                .bind(event.to_string())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Other(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| StoreError::Other(e.to_string()))
    }

    async fn flush(&self) -> StoreResult<()> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.parse()?))
        .with_target(false)
        .init();

    let client = Client::connect(&args.controller).await?;
    let backend = SqliteStore::connect(&args.dsn).await?;
    let adapter = StoreAdapter::new(backend);

    info!(storeproc_id = args.storeproc_id, dsn = %args.dsn, "store process started");

    loop {
        let item = client
            .call("get_events", serde_json::json!([args.storeproc_id]))
            .await?;
        match item.get("code").and_then(Value::as_str) {
            Some("EVENTS") => {
                let events = item
                    .get("events")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                adapter.handle_events(&events).await;
            }
            Some("FLUSH") => adapter.flush().await,
            Some("SIMEND") => {
                adapter.close().await;
                info!(storeproc_id = args.storeproc_id, "simulation ended, closing store");
                break;
            }
            other => warn!(?other, "unexpected get_events response shape"),
        }
    }
    Ok(())
}
