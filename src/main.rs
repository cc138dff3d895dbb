use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tflite_detect_server::app::config::AppConfig;
use tflite_detect_server::app::App;

/// Serve a TFLite object detection model over HTTP and websockets.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file. `DETECT_*` environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "configuration loaded");

    let app = App::start(config).await.context("failed to start")?;
    app.run().await.context("server stopped with an error")?;
    tracing::info!("shut down");
    Ok(())
}
