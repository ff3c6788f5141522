//! Logward ingestion server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use logward_core::config::AppConfig;
use logward_metadata::MetadataStore;
use logward_server::parser::EnvelopeParser;
use logward_server::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Detail recorded on summaries left PROCESSING by a previous run.
const INTERRUPTED_DETAIL: &str = "processing interrupted by server restart";

/// Logward - combat log ingestion server
#[derive(Parser, Debug)]
#[command(name = "logwardd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LOGWARD_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("Logward v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, defaults cover everything else)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            "No config file found at {}, using defaults and environment",
            args.config
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LOGWARD_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Register Prometheus metrics
    logward_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize summary store
    let metadata = logward_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize summary store")?;
    metadata
        .health_check()
        .await
        .context("summary store health check failed")?;
    tracing::info!("Summary store initialized");

    // Nothing survives a restart to finish these
    recover_interrupted_summaries(&metadata).await?;

    // Create application state (starts the processing workers)
    let state = AppState::new(config.clone(), metadata, Arc::new(EnvelopeParser));

    let sweep_interval = config.server.pending_sweep_interval();
    logward_server::stager::spawn_sweep_task(state.stager.clone(), sweep_interval);
    tracing::info!(
        interval_secs = sweep_interval.as_secs(),
        "Pending upload sweep task spawned"
    );

    if let Some(cleanup_interval) = state.admission_cleanup_interval() {
        logward_server::admission::spawn_cleanup_task(state.gate.clone(), cleanup_interval);
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Admission gate cleanup task spawned"
        );
    }

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Fail summaries orphaned by a previous server instance.
///
/// Pending uploads live only in memory, so any summary still PROCESSING at
/// startup has no worker that will ever complete it.
async fn recover_interrupted_summaries(metadata: &Arc<dyn MetadataStore>) -> Result<()> {
    let recovered = metadata
        .fail_processing_summaries(INTERRUPTED_DETAIL, OffsetDateTime::now_utc())
        .await
        .context("failed to recover interrupted summaries")?;

    if recovered > 0 {
        tracing::warn!(
            count = recovered,
            "Marked summaries from previous server instance as failed"
        );
    }

    Ok(())
}
