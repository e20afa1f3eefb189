use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::Level;
use vibe_server::ServerConfig;
use vibe_store::{Database, RoomRepo};
use vibe_telemetry::{LogFormat, TelemetryConfig};

/// Real-time relay for morse and speech signals between a sender and its receivers.
#[derive(Debug, Parser)]
#[command(name = "vibe", version)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "VIBE_BIND", default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, env = "VIBE_PORT", default_value_t = 8000)]
    port: u16,

    /// SQLite file for the room listing. Defaults to ~/.vibe/database/rooms.db.
    #[arg(long, env = "VIBE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Run without the persistent room listing.
    #[arg(long, env = "VIBE_NO_STORE")]
    no_store: bool,

    #[arg(long, env = "VIBE_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long, env = "VIBE_LOG_JSON")]
    json_logs: bool,

    /// Per-connection outbound queue capacity.
    #[arg(long, env = "VIBE_SEND_QUEUE", default_value_t = 256)]
    send_queue: usize,

    /// Seconds an empty room stays resident before eviction.
    #[arg(long, env = "VIBE_ROOM_IDLE_SECS", default_value_t = 3600)]
    room_idle_secs: u64,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            port: self.port,
            max_send_queue: self.send_queue.max(1),
            room_idle_timeout: Duration::from_secs(self.room_idle_secs),
            ..Default::default()
        }
    }

    fn database_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| dirs_home().join(".vibe").join("database").join("rooms.db"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _telemetry = vibe_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        module_levels: vec![("tower_http".to_string(), Level::WARN)],
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    })
    .context("failed to initialize logging")?;

    tracing::info!("Starting vibe relay");

    let store = if cli.no_store {
        None
    } else {
        let db_path = cli.database_path();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let db = Database::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), "Database opened");
        Some(RoomRepo::new(db))
    };

    let handle = vibe_server::start(cli.server_config(), store)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "Vibe relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
