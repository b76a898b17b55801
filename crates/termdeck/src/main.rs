//! Daemon entrypoint for termdeck.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tracing::info;

use termdeck::telemetry;
use termdeck_daemon::ServerConfig;
use termdeck_daemon::Workdir;

/// Terminal session multiplexer for the browser workbench.
///
/// Flags override the corresponding `TERMDECK_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "termdeck", version)]
struct Cli {
    /// Address to listen on (default 127.0.0.1:9190).
    #[arg(long)]
    listen: Option<String>,
    /// Allow binding a non-loopback address.
    #[arg(long)]
    allow_remote: bool,
    /// Shell executable for new sessions (default $TERMDECK_SHELL, then $SHELL).
    #[arg(long)]
    shell: Option<String>,
    /// Working directory for new sessions (default: current directory).
    #[arg(long, env = "TERMDECK_WORKDIR")]
    workdir: Option<PathBuf>,
    /// Maximum sessions per connection.
    #[arg(long)]
    max_sessions: Option<usize>,
    /// Maximum concurrent connections.
    #[arg(long)]
    max_connections: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init_tracing("info");
    let cli = Cli::parse();

    let mut config = ServerConfig::from_env();
    if let Some(listen) = cli.listen {
        config = config.with_listen(listen);
    }
    if cli.allow_remote {
        config = config.with_allow_remote(true);
    }
    if let Some(shell) = cli.shell {
        config = config.with_shell(shell);
    }
    if let Some(max) = cli.max_sessions {
        config = config.with_max_sessions(max);
    }
    if let Some(max) = cli.max_connections {
        config = config.with_max_connections(max);
    }

    let workdir = match cli.workdir {
        Some(dir) => Workdir::at(dir),
        None => Workdir::new(),
    };

    let handle = termdeck_daemon::start(config, workdir)
        .await
        .context("failed to start terminal bridge")?;
    info!(addr = %handle.local_addr(), pid = std::process::id(), "termdeck started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
