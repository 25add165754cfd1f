use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vox_fabric::Client;
use vox_node::{Config, ControlServer, Daemon, Dispatcher, Overrides, SessionManager};

/// Vox daemon - voice assistant node on the control bus
#[derive(Parser)]
#[command(name = "vox-daemon", version, about)]
struct Cli {
    /// Config file (defaults to ./vox.toml when present)
    #[arg(short, long, env = "VOX_CONFIG")]
    config: Option<PathBuf>,

    /// Hub endpoint (ws://, wss:// or tcp://)
    #[arg(long, env = "VOX_URL")]
    url: Option<String>,

    /// Bus address of this node
    #[arg(long, env = "VOX_SHARD")]
    shard: Option<String>,

    /// Control socket path
    #[arg(long, env = "VOX_SOCKET")]
    socket: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "info,vox_node=debug,vox_fabric=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        url: cli.url,
        shard: cli.shard,
        socket: cli.socket,
    };
    let config = Config::load(cli.config.as_deref(), overrides)?;

    tracing::info!(
        url = config.client.url.as_str(),
        shard = config.client.shard.as_str(),
        socket = %config.socket.display(),
        "starting vox daemon"
    );

    let client = Arc::new(Client::connect(config.client.clone()).await?);
    client.on_unsolicited(|msg| tracing::info!(%msg, "bus message"));
    let reader = client.spawn();

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&client),
        config.devices.clone(),
        config.request_timeout,
    ));
    let sessions = SessionManager::new();
    tracing::info!("no speech pipeline configured, trigger is unavailable");
    let daemon = Arc::new(Daemon::new(dispatcher, Arc::clone(&sessions), None));

    let server = ControlServer::bind(&config.socket)?;
    server
        .serve(daemon, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("shutting down");
    sessions.stop();
    client.close().await?;
    reader.await?;
    Ok(())
}
