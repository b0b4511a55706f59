use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scrum_poker_server::telemetry::{Telemetry, TelemetryConfig};
use scrum_poker_server::{AppState, ServerConfig};
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "scrum-poker-server",
    author,
    version,
    about = "Planning poker session server"
)]
struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "SCRUM_POKER_LISTEN_ADDR", default_value = "127.0.0.1:3001")]
    listen_addr: String,

    /// Seconds between pings sent to every open channel.
    #[arg(long, env = "SCRUM_POKER_HEARTBEAT_SECS", default_value_t = 10)]
    heartbeat_secs: u64,

    /// Close a channel after this many seconds without inbound traffic.
    #[arg(long, env = "SCRUM_POKER_READ_TIMEOUT_SECS", default_value_t = 20)]
    read_timeout_secs: u64,

    /// Remove a session after this many seconds without connections.
    #[arg(long, env = "SCRUM_POKER_SESSION_TTL_SECS", default_value_t = 3600)]
    session_ttl_secs: u64,

    /// Grace period applied during shutdown.
    #[arg(long, env = "SCRUM_POKER_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    shutdown_grace_secs: u64,

    /// Directory of a built web front-end to serve for non-API paths.
    #[arg(long, env = "SCRUM_POKER_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Log filter directives, e.g. `info,scrum_poker_server=debug`.
    #[arg(long, env = "SCRUM_POKER_LOG_FILTER")]
    log_filter: Option<String>,

    /// Print finished tracing spans to stdout.
    #[arg(long, env = "SCRUM_POKER_OTEL_STDOUT")]
    otel_stdout: bool,
}

impl Cli {
    fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_filter: self.log_filter.clone(),
            otel_stdout: self.otel_stdout,
        }
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        anyhow::ensure!(cli.heartbeat_secs > 0, "heartbeat interval must be positive");
        anyhow::ensure!(
            cli.read_timeout_secs > cli.heartbeat_secs,
            "read timeout must exceed the heartbeat interval"
        );
        if let Some(dir) = &cli.static_dir {
            anyhow::ensure!(dir.is_dir(), "static dir {} does not exist", dir.display());
        }
        Ok(ServerConfig {
            listen_addr,
            heartbeat_interval: Duration::from_secs(cli.heartbeat_secs),
            read_timeout: Duration::from_secs(cli.read_timeout_secs),
            session_ttl: Duration::from_secs(cli.session_ttl_secs),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            static_dir: cli.static_dir,
            ..ServerConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = Telemetry::init(&cli.telemetry())?;

    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        session_ttl_secs = config.session_ttl.as_secs(),
        static_dir = ?config.static_dir,
        "starting scrum-poker server"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    let grace = config.shutdown_grace;
    let state = Arc::new(AppState::new(config, Some(telemetry.metrics_handle())));

    scrum_poker_server::serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
