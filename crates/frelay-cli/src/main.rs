//! frelay: interactive client for frelay-server.
//!
//! Prints every text the server pushes and sends each stdin line of the form
//! `<target_id> <text>` as a chat message. Ctrl-C or EOF ends the session.

mod client;
mod config;

use anyhow::Result;
use clap::Parser;
use frelay_core::{FrameCodec, DEFAULT_MAX_FRAME_LEN};
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// frelay: relay chat client
#[derive(Parser, Debug)]
#[command(name = "frelay", version, about = "Interactive client for frelay-server")]
struct Cli {
    /// Server address as host:port
    #[arg(short, long)]
    server: Option<String>,

    /// Connection attempts before giving up (0 = retry forever)
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds between connection attempts
    #[arg(long)]
    retry_interval: Option<u64>,

    /// Config file path
    #[arg(long, default_value = "~/.frelay/client.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Exit explicitly: a pending stdin read would otherwise hold the runtime open.
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("frelay: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::Config::load(&cli.config)?;
    let server = cli.server.unwrap_or(cfg.default.server);
    let retries = cli.retries.unwrap_or(cfg.default.retries);
    let interval = Duration::from_secs(cli.retry_interval.unwrap_or(cfg.default.retry_interval).max(1));

    let stream = client::connect_with_retry(&server, interval, retries).await?;
    let (reader, writer) = stream.into_split();
    let codec = FrameCodec::new(DEFAULT_MAX_FRAME_LEN);

    let mut reader_task = tokio::spawn(client::read_loop(reader, codec, |text| {
        println!("{text}");
    }));

    let stdin = BufReader::new(tokio::io::stdin());
    let writer_task = client::write_loop(stdin, writer, codec, interrupt());

    tokio::select! {
        sent = writer_task => {
            sent?;
            info!("session ended");
        }
        received = &mut reader_task => {
            match received {
                Ok(Ok(())) => info!("server closed the connection"),
                Ok(Err(e)) => return Err(e),
                Err(e) => warn!(error = %e, "reader task failed"),
            }
        }
    }

    Ok(())
}

/// Resolve on Ctrl-C.
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
