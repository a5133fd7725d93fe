//! frelay-server binary: CLI parsing, logging, and signal-driven shutdown.

use clap::Parser;
use frelay_server::{CliOverrides, IdPolicy, RelayServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// frelay-server: message-oriented TCP relay
#[derive(Parser, Debug)]
#[command(name = "frelay-server", version, about = "Message-oriented TCP relay server")]
struct Cli {
    /// Listen address, e.g. 0.0.0.0:7788
    #[arg(short, long)]
    listen: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.frelay/server.toml")]
    config: String,

    /// Maximum envelope length in bytes
    #[arg(long)]
    max_frame_len: Option<usize>,

    /// Idle timeout in seconds (0 = disabled)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Seconds a frame write may block before the session is dropped (0 = no limit)
    #[arg(long)]
    write_timeout: Option<u64>,

    /// Session id assignment policy
    #[arg(long, value_enum)]
    id_policy: Option<IdPolicy>,

    /// Seconds between player list broadcasts (0 = only on join/leave)
    #[arg(long)]
    player_list_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting frelay-server");

    // Load server config (file + CLI overrides)
    let overrides = CliOverrides {
        listen: cli.listen.clone(),
        max_frame_len: cli.max_frame_len,
        idle_timeout: cli.idle_timeout,
        write_timeout: cli.write_timeout,
        id_policy: cli.id_policy,
        player_list_interval: cli.player_list_interval,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = match RelayServer::new(server_config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    let listener = match server.bind().await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run(listener, shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("frelay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
