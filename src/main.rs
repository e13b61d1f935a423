use bedrock_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "bedrock-proxy",
    about = "OpenAI-compatible chat completions proxy for Amazon Bedrock Nova models",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Require authentication on every request (overrides config)
    #[arg(long)]
    require_auth: bool,

    /// Log file path (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bedrock_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. bedrock-proxy.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/bedrock-proxy/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/bedrock-proxy/config.toml");
            println!("     ~/.config/bedrock-proxy/config.toml");
        }
        println!("  3. ~/.bedrock-proxy.toml");
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(region) = cli.region {
        config.backend.region = region;
    }
    if cli.require_auth {
        config.auth.require_auth = true;
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = log_file;
    }

    let logger = SharedLogger::new(&config.log_file)?;

    info!("bedrock-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Region:    {}", config.backend.region);
    info!("  Runtime:   {}", config.runtime_endpoint());
    info!("  Port:      {}", config.port);
    info!("  Auth:      {}", if config.auth.require_auth { "required" } else { "anonymous allowed" });
    info!("  Streaming: {}", if config.buffered_streaming { "buffered" } else { "SSE" });
    info!("  Models:    {} mapped", config.model_table().aliases().len());
    info!("  Log file:  {}", config.log_file.display());

    if config.resolve_api_key().is_err() {
        tracing::warn!(
            "Environment variable '{}' not set; backend calls will fail until it is",
            config.backend.api_key_env
        );
    }

    logger.info(
        "startup",
        format!(
            "Starting bedrock-proxy region={} port={}",
            config.backend.region, config.port
        ),
    );

    let port = config.port;
    let state = Arc::new(AppState::new(config, logger)?);

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
