use anyhow::Context;
use botview_engine::EngineConfig;
use botview_protocol::StartBot;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Run one bot headless and serve its viewer on localhost.
#[derive(Debug, Parser)]
#[command(name = "botview-server", version)]
struct Cli {
    #[arg(long)]
    username: String,

    /// Game server, `host` or `host:port`.
    #[arg(long)]
    host: String,

    /// Config file (defaults to ~/.botview/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    viewer_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    botview_server::init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => EngineConfig::load_or_default().context("load default config")?,
    };
    if let Some(port) = cli.viewer_port {
        config.viewer.port = port;
    }

    let (handle, orchestrator) =
        botview_server::orchestrator(config, Arc::new(botview_server::LogNotifier));
    let task = tokio::spawn(orchestrator.run());

    let request = StartBot::new(cli.username, cli.host);
    request.validate()?;
    handle.start(request)?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    handle.shutdown().await;
    task.await.context("orchestrator task")?;
    Ok(())
}
