//! Standalone entry point that wires the core subsystems into an HTTP +
//! WebSocket management server (spec §6).
//!
//! Everything this binary does beyond construction is out of the core's
//! scope (spec §1): there is no upstream dispatch, auth middleware, or YAML
//! config loader here — just the management surface over the cache,
//! metrics, audit, and provider-health components, so the facade can be
//! exercised end-to-end the way the dashboard would see it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use llm_proxy_core::api::{self, ApiState};
use llm_proxy_core::audit::AuditRing;
use llm_proxy_core::cache::CacheSystem;
use llm_proxy_core::config::CoreConfig;
use llm_proxy_core::metrics::{MetricsStore, MetricsSystem};
use llm_proxy_core::provider::ProviderHealthTracker;

const AUDIT_MAX_ENTRIES: usize = 10_000;
const AUDIT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
const HUB_BROADCAST_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = match std::env::var("LLM_PROXY_CONFIG") {
        Ok(path) => CoreConfig::from_file(&path)?,
        Err(_) => CoreConfig::default(),
    };

    tracing::info!(
        version = llm_proxy_core::VERSION,
        "starting {}",
        llm_proxy_core::NAME
    );

    let audit = Arc::new(AuditRing::new(AUDIT_MAX_ENTRIES, AUDIT_RETENTION));
    audit.clone().spawn_sweeper();

    let store = if config.metrics_db.enabled {
        match MetricsStore::connect(&config.metrics_db.dsn, &config.metrics_db).await {
            Ok(store) => {
                llm_proxy_core::metrics::persistence::spawn_flusher(
                    store.clone(),
                    Duration::from_secs(config.metrics_db.flush_interval_seconds),
                );
                Some(store)
            }
            Err(err) => {
                tracing::warn!(%err, "metrics database unavailable, continuing in-memory only");
                None
            }
        }
    } else {
        None
    };

    let metrics = Arc::new(MetricsSystem::new(audit.clone(), HUB_BROADCAST_INTERVAL, store));
    metrics.spawn_hub();

    let cache = Arc::new(CacheSystem::init(&config.cache, &config.redis).await);
    let provider_health = Arc::new(ProviderHealthTracker::new());

    let state = ApiState {
        metrics,
        cache,
        audit,
        provider_health,
    };

    let addr: SocketAddr = std::env::var("LLM_PROXY_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8089)));

    tracing::info!(%addr, "management API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, api::router(state)).await?;

    Ok(())
}
