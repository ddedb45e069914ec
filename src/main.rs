//! DEX transaction orchestrator
//!
//! Drives user intents (swap, add liquidity, vault deposit/withdraw, bridge
//! withdraw) through build, trustline recovery, signing and broadcast, and
//! serves rate-limit aware batched price lookups.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

mod api;
mod config;
mod error;
mod metrics;
mod orchestrator;
mod pricing;
mod state;
mod tx;

use api::AppState;
use config::Settings;
use metrics::MetricsServer;
use pricing::{BatchedRetryingFetcher, FetchPolicy, HttpPriceSource, PriceSource};
use state::SessionRegistry;
use tx::{
    BroadcastClient, BuilderClient, HttpBroadcastClient, HttpBuilderClient, HttpSignerGateway,
    SignerGateway,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting DEX transaction orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(instance = %settings.service.instance_id, "Loaded configuration");

    // Collaborator clients
    let builder: Arc<dyn BuilderClient> = Arc::new(HttpBuilderClient::new(&settings.builder)?);
    let signer: Arc<dyn SignerGateway> = Arc::new(HttpSignerGateway::new(&settings.signer)?);
    let broadcaster: Arc<dyn BroadcastClient> =
        Arc::new(HttpBroadcastClient::new(&settings.broadcast)?);
    info!(
        builder = %settings.builder.base_url,
        broadcast = %settings.broadcast.url,
        "Transaction collaborators initialized"
    );

    let registry = Arc::new(SessionRegistry::new(
        builder,
        signer,
        broadcaster,
        settings.orchestrator.clone(),
    ));

    // Price fetcher
    let source: Arc<dyn PriceSource> =
        Arc::new(HttpPriceSource::new(settings.pricing.upstream_url.clone())?);
    let policy = FetchPolicy::from(&settings.pricing);
    info!(
        batch_size = policy.batch_size,
        max_attempts = policy.max_attempts,
        "Price fetcher initialized"
    );
    let fetcher = Arc::new(BatchedRetryingFetcher::new(source, policy));

    let state = AppState::new(registry.clone(), fetcher, settings.api.allowed_origins.clone());

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Session eviction loop
    let eviction_handle = tokio::spawn({
        let registry = registry.clone();
        let ttl = registry.idle_ttl();
        let interval = ttl.min(Duration::from_secs(60));
        async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.evict_idle(ttl);
            }
        }
    });

    info!("Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    eviction_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Orchestrator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dex_tx_orchestrator=debug,hyper=warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
