use clap::Parser;
use llm_bridge::config::config_search_paths;
use llm_bridge::{build_router, AppState, BridgeConfig, ProviderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "llm-bridge",
    about = "Serve one LLM provider's API on top of another's",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,

    /// Print every supported source -> target conversion and exit
    #[arg(long)]
    list_conversions: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_bridge=info,tower_http=info".into()),
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

    if cli.list_conversions {
        for (source, target) in ProviderRegistry::global().all_conversion_pairs() {
            println!("{source} -> {target}");
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref provider) = cli.provider {
        config.override_provider(provider);
    }

    // Validate config eagerly
    let base_url = config.effective_base_url()?;
    let backend = config.backend_kind()?;
    let _api_key = config.resolve_api_key()?;

    info!("llm-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:  {}", config.provider.name);
    info!("  Base URL:  {}", base_url);
    info!("  Protocol:  {}", backend);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} mapped", config.models.len());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let state = Arc::new(AppState::new(config.clone(), client));
    for kind in state.registry.providers() {
        info!("  Serving {} clients at POST {}", kind, kind.client_route());
    }

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
