use clap::Parser;
use claude_azure_proxy::config::config_search_paths;
use claude_azure_proxy::logging::RETAINED_LOG_FILES;
use claude_azure_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-azure-proxy",
    about = "Anthropic Messages API gateway for Azure OpenAI deployments",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Exchange log path (JSON lines); the date is inserted before the extension
    #[arg(long, default_value = "claude-azure-proxy.log")]
    log_file: PathBuf,

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
                .unwrap_or_else(|_| "claude_azure_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // Fail at startup rather than on the first request
    config.resolve_api_key()?;
    let auth_token = config.resolve_auth_token();

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           claude-azure-proxy v{}                  ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Backend:     {}", config.backend.base_url);
    info!("  Default:     {}", config.deployments.default.as_deref().unwrap_or("(none)"));
    info!("  Responses:   {}", config.deployments.responses.as_deref().unwrap_or("(none)"));
    info!("  Aliases:     {} mapped", config.deployments.aliases.len());
    info!("  Auth:        {}", if auth_token.is_some() { "bearer token" } else { "disabled" });
    info!("  Port:        {}", config.port);
    info!("  Log file:    {} (rotated daily, {} kept)", cli.log_file.display(), RETAINED_LOG_FILES);

    logger.info(
        "startup",
        format!(
            "Starting claude-azure-proxy base_url={} port={}",
            config.backend.base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.backend.timeout_secs))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        logger: logger.clone(),
        auth_token,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{} claude", config.port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
