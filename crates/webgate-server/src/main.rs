use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webgate_driver::cdp::{CdpDriver, CdpDriverConfig};
use webgate_server::{Gateway, GatewayConfig};

#[derive(Debug, Parser)]
#[command(name = "webgate", about = "Browser automation gateway over JSON-RPC")]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, env = "WEBGATE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Port for the WebSocket transport.
    #[arg(long, env = "WEBGATE_SOCKET_PORT")]
    socket_port: Option<u16>,

    /// Disable the WebSocket transport.
    #[arg(long)]
    no_socket: bool,

    /// Disable the stdio transport.
    #[arg(long)]
    no_stdio: bool,

    /// Run the browser with a visible window.
    #[arg(long)]
    headed: bool,

    /// Keep the browser sandbox enabled (off by default for containers).
    #[arg(long)]
    sandbox: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        // stdout carries the line protocol; logs must not mix into it.
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {path:?}"))?;
            serde_json::from_str::<GatewayConfig>(&raw)
                .with_context(|| format!("parsing config file {path:?}"))?
        }
        None => GatewayConfig::default(),
    };
    if let Some(port) = args.socket_port {
        config.socket_port = port;
    }
    if args.no_socket {
        config.enable_socket = false;
    }
    if args.no_stdio {
        config.enable_stdio = false;
    }

    info!(
        socket = config.enable_socket,
        stdio = config.enable_stdio,
        port = config.socket_port,
        "starting webgate"
    );

    let driver = Arc::new(
        CdpDriver::launch(CdpDriverConfig {
            headless: !args.headed,
            no_sandbox: !args.sandbox,
            executable: None,
        })
        .await
        .context("launching browser")?,
    );

    let gateway = Gateway::new(config, driver).await?;
    let (shutdown_tx, _) = broadcast::channel(1);

    let run = gateway.run(shutdown_tx.clone());
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, draining");
            let _ = shutdown_tx.send(());
            let _ = run.await;
        }
    }

    gateway.shutdown().await;
    Ok(())
}
