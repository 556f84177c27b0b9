//! Switchboard: a multiplexing bridge server between browser clients and
//! AI coding CLI subprocesses.

mod config;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard_bridge::Bridge;
use switchboard_launcher::{Launcher, LauncherConfig};

use crate::config::{FileConfig, ServerConfig};

/// Bridge server between browsers and AI coding CLI subprocesses.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
struct Args {
    /// Bind address for the WebSocket listener.
    #[arg(long, env = "SWITCHBOARD_BIND")]
    bind: Option<SocketAddr>,

    /// Data directory for session persistence.
    #[arg(long, env = "SWITCHBOARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Claude-style CLI binary (name or path).
    #[arg(long, env = "SWITCHBOARD_CLAUDE_BINARY")]
    claude_binary: Option<String>,

    /// Codex-style CLI binary (name or path).
    #[arg(long, env = "SWITCHBOARD_CODEX_BINARY")]
    codex_binary: Option<String>,

    /// Per-session event ring capacity.
    #[arg(long, env = "SWITCHBOARD_RING_CAPACITY")]
    ring_capacity: Option<usize>,

    /// Optional TOML config file; CLI flags win.
    #[arg(long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FileConfig::default(),
    };
    let config = ServerConfig::resolve(
        file,
        args.bind,
        args.data_dir,
        args.claude_binary,
        args.codex_binary,
        args.ring_capacity,
    );

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    let local_addr = listener.local_addr().context("reading local address")?;
    info!(addr = %local_addr, "websocket listener bound");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let launcher = Launcher::new(
        LauncherConfig {
            data_dir: config.data_dir.clone(),
            claude_binary: config.claude_binary.clone(),
            codex_binary: config.codex_binary.clone(),
            loopback_port: local_addr.port(),
        },
        events_tx,
    );

    let recovered = launcher.restore_from_disk().await;
    info!(recovered, "session snapshot restored");

    let bridge = Bridge::new(Arc::clone(&launcher), config.ring_capacity);
    bridge.start(events_rx);

    let serve_bridge = Arc::clone(&bridge);
    tokio::spawn(switchboard_bridge::serve(serve_bridge, listener));

    wait_for_shutdown().await;

    // Children are deliberately left running: the snapshot lets the next
    // server process re-adopt live Claude sessions.
    info!("shutting down; live subprocesses stay up for re-adoption");
    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
