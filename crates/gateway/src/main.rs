//! NexoraOS API Gateway
//!
//! The entry point for all external API requests.
//! Handles:
//! - Authentication and the subscription paywall
//! - Rate limiting
//! - Ebook pipeline, catalog and webhook routing
//! - Observability (logging, metrics)
//!
//! `--memory` runs against the in-process store with an ephemeral JWT secret
//! and a pre-subscribed development user, for local work without Postgres.

mod app;
mod handlers;
mod middleware;

pub use app::AppState;

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use nexora_common::{
    auth::JwtManager,
    config::{AppConfig, ObservabilityConfig},
    db::{
        models::SubscriptionStatus, store::SubscriptionUpdate, DbPool, MemoryStore, Repository,
        SubscriptionStore,
    },
    metrics::{self, LATENCY_BUCKETS, LLM_BUCKETS, METRICS_PREFIX},
    LlmClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let in_memory = std::env::args().any(|arg| arg == "--memory");

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting NexoraOS API Gateway v{}", nexora_common::VERSION);

    // Initialize metrics
    init_metrics_exporter(config.observability.metrics_port)?;
    metrics::register_metrics();

    let llm = LlmClient::from_config(&config.llm)?;
    info!(model = llm.model_name(), "LLM client ready");

    let state = if in_memory {
        memory_state(config, llm).await?
    } else {
        info!("Connecting to database...");
        let db = DbPool::new(&config.database).await?;
        let repo = Arc::new(Repository::new(db));
        let jwt = JwtManager::from_config(&config.auth)?;
        AppState::new(config, repo.clone(), repo.clone(), repo, llm, jwt)
    };

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .context("invalid server.host / server.port")?;

    // Build the router
    let app = app::create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// State backed by [`MemoryStore`], with one subscribed user whose token is
/// logged at startup
async fn memory_state(config: AppConfig, llm: LlmClient) -> anyhow::Result<AppState> {
    let store = Arc::new(MemoryStore::new());
    let jwt = match JwtManager::from_config(&config.auth) {
        Ok(jwt) => jwt,
        Err(_) => JwtManager::ephemeral(config.auth.jwt_expiration_secs),
    };

    let dev_user = Uuid::new_v4();
    store
        .upsert_subscription(SubscriptionUpdate {
            user_id: dev_user,
            status: SubscriptionStatus::Active,
            provider_customer_id: None,
            current_period_end: None,
        })
        .await?;
    let token = jwt.generate_token(dev_user)?;
    info!(user_id = %dev_user, token = %token, "In-memory mode: development token issued");

    Ok(AppState::new(
        config,
        store.clone(),
        store.clone(),
        store,
        llm,
        jwt,
    ))
}

fn init_tracing(config: &ObservabilityConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port. Port 0 disables the exporter.
fn init_metrics_exporter(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        return Ok(());
    }

    let full = |name: &str| Matcher::Full(format!("{}_{}", METRICS_PREFIX, name));

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(full("request_duration_seconds"), LATENCY_BUCKETS)?
        .set_buckets_for_metric(full("llm_duration_seconds"), LLM_BUCKETS)?
        .set_buckets_for_metric(full("stage_duration_seconds"), LLM_BUCKETS)?
        .install()
        .context("failed to install Prometheus exporter")?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
