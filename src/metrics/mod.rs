//! Metrics subsystem: a real-time in-memory tracker (C9), rolling historical
//! windows (C10), a WebSocket fan-out hub (C12), and optional durable
//! persistence (C13).

pub mod historical;
pub mod hub;
pub mod persistence;
pub mod tracker;

use std::sync::Arc;

use crate::audit::AuditRing;

pub use historical::{HistoricalBuckets, HistoricalSnapshot, MetricBucket};
pub use hub::{EnhancedMetrics, MetricsHub};
pub use persistence::{MetricsStore, SnapshotRecord, ThroughputPoint};
pub use tracker::{Percentiles, RealtimeTracker, TrackerSnapshot};

/// Token/latency/outcome fields of one completed upstream call, as recorded
/// across the tracker, historical windows, and (if enabled) the durable
/// store.
#[derive(Debug, Clone, Copy)]
pub struct CompletedCall {
    /// Total tokens (input + output).
    pub tokens: u64,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// End-to-end latency in milliseconds.
    pub latency_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
}

/// Everything a request handler needs to record a completed upstream call
/// and everything the management API needs to read it back.
pub struct MetricsSystem {
    /// Live 60-second ring tracker (C9).
    pub tracker: Arc<RealtimeTracker>,
    /// Rolling second/minute/hour/day windows (C10).
    pub historical: Arc<HistoricalBuckets>,
    /// WebSocket fan-out hub (C12).
    pub hub: Arc<MetricsHub>,
    /// Durable time-series store, if `metrics_db` is enabled (C13).
    pub store: Option<Arc<MetricsStore>>,
}

impl MetricsSystem {
    /// Wire a tracker, historical windows, and hub together, optionally
    /// backed by a durable store.
    pub fn new(audit: Arc<AuditRing>, broadcast_interval: std::time::Duration, store: Option<Arc<MetricsStore>>) -> Self {
        let tracker = Arc::new(RealtimeTracker::new());
        let hub = MetricsHub::new(tracker.clone(), audit, broadcast_interval);
        Self {
            tracker,
            historical: Arc::new(HistoricalBuckets::new()),
            hub,
            store,
        }
    }

    /// Record one completed upstream call across every live sink: the
    /// real-time tracker, the historical rolling windows, and (if enabled)
    /// the durable store's write queue.
    pub async fn record(&self, model: &str, provider: &str, call: CompletedCall) {
        self.tracker.record(model, call.tokens, call.latency_ms, call.success);
        self.historical
            .record(call.tokens, call.input_tokens, call.output_tokens, call.latency_ms, call.success);

        if let Some(store) = &self.store {
            let record = SnapshotRecord {
                recorded_at: chrono::Utc::now(),
                model: model.to_string(),
                provider: provider.to_string(),
                tokens: call.tokens as i64,
                input_tokens: call.input_tokens as i64,
                output_tokens: call.output_tokens as i64,
                latency_ms: call.latency_ms as i64,
                success: call.success,
            };
            if let Err(err) = store.record(record).await {
                tracing::error!(%err, "failed to enqueue metrics snapshot");
            }
        }
    }

    /// Spawn the hub's broadcast reactor onto the runtime.
    pub fn spawn_hub(&self) {
        let hub = self.hub.clone();
        tokio::spawn(async move { hub.run().await });
    }
}
