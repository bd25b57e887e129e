//! Stock analysis HTTP server
//!
//! # Usage
//!
//! ```bash
//! # Optional: enable the AI narrative
//! export API_URL="https://api.openai.com/"
//! export API_KEY="sk-..."
//! export API_MODEL="gpt-4o-mini"
//!
//! cargo run --bin stock-server -p agent-stock -- --port 8000
//! ```

use agent_stock::config::ServiceConfig;
use agent_stock::server::{AppState, build_router};
use agent_stock::service::StockService;
use agent_utils::{LogFormat, init_tracing};
use anyhow::Context;
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "stock-server", version, about = "Stock analysis HTTP and MCP server")]
struct Cli {
    /// Address to bind
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Instruments analysed in parallel during a scan
    #[arg(long, env = "SCAN_CONCURRENCY")]
    scan_concurrency: Option<usize>,

    /// `text` or `json`
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env().context("reading configuration from the environment")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(n) = cli.scan_concurrency {
        config.scan_concurrency = n;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.validate().context("invalid configuration")?;

    init_tracing(config.log_format);
    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let service = StockService::from_config(&config).context("building the analysis service")?;
    let app = build_router(AppState::new(service));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        ai = config.ai.is_some(),
        scan_concurrency = config.scan_concurrency,
        "Starting HTTP server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
    }
}
