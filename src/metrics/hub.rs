//! Metrics fan-out hub (C12): broadcasts snapshots to WebSocket clients at a
//! fixed interval.
//!
//! A single reactor task owns the client set; it never blocks on network
//! I/O — it enqueues to each client's bounded send channel and drops the
//! channel (marking the client stale) on a full buffer (spec §4.12, §5,
//! §9 "coroutine-style pumps"). Read/write pumps live in `api::ws` where the
//! actual `axum` socket is available; this module only owns registration,
//! the broadcast ticker, and the snapshot payload shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditRing};
use crate::metrics::tracker::{RealtimeTracker, TrackerSnapshot};

/// The payload pushed to every connected WebSocket client (spec §6
/// `EnhancedMetrics`): the live tracker snapshot plus recent audit slices.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedMetrics {
    /// Flattened live tracker snapshot.
    #[serde(flatten)]
    pub live: TrackerSnapshot,
    /// Seconds since the process started.
    pub uptime_seconds: u64,
    /// Most recent audit entries, newest first.
    pub recent_requests: Vec<AuditEntry>,
    /// Most recent error entries, newest first.
    pub recent_errors: Vec<AuditEntry>,
    /// Id of the client this payload was sent to.
    pub connection_id: Uuid,
    /// When this snapshot was built.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Client lifecycle state (spec §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Registered but not yet confirmed running.
    Connected,
    /// Actively receiving broadcasts.
    Running,
    /// Unregistered; no further sends will be attempted.
    Closed,
}

struct Client {
    sender: mpsc::Sender<Vec<u8>>,
    state: ClientState,
}

/// Registration handle returned to the WebSocket route handler; dropping it
/// (or the connection closing) triggers unregistration.
pub struct ClientHandle {
    /// This client's connection id.
    pub id: Uuid,
    /// Receiving end of the client's send channel.
    pub receiver: mpsc::Receiver<Vec<u8>>,
}

struct HubState {
    clients: HashMap<Uuid, Client>,
}

/// Single-reactor WebSocket fan-out hub. The tracker is read-only from the
/// hub's perspective — the hub never mutates or owns it (spec §9, one-way
/// reference).
pub struct MetricsHub {
    state: Mutex<HubState>,
    tracker: Arc<RealtimeTracker>,
    audit: Arc<AuditRing>,
    broadcast_interval: Duration,
}

impl MetricsHub {
    /// Construct a hub over a shared tracker and audit ring.
    pub fn new(tracker: Arc<RealtimeTracker>, audit: Arc<AuditRing>, broadcast_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                clients: HashMap::new(),
            }),
            tracker,
            audit,
            broadcast_interval,
        })
    }

    /// Register a new client with a bounded send channel (capacity 16: a
    /// client more than 16 snapshots behind is considered stale).
    pub async fn register(&self) -> ClientHandle {
        let (tx, rx) = mpsc::channel(16);
        let id = Uuid::new_v4();
        self.state.lock().await.clients.insert(
            id,
            Client {
                sender: tx,
                state: ClientState::Connected,
            },
        );
        tracing::info!(%id, "metrics hub client registered");
        ClientHandle { id, receiver: rx }
    }

    /// Unregister a client, closing its send channel.
    pub async fn unregister(&self, id: Uuid) {
        if let Some(mut client) = self.state.lock().await.clients.remove(&id) {
            client.state = ClientState::Closed;
        }
        tracing::info!(%id, "metrics hub client unregistered");
    }

    fn build_snapshot(&self) -> EnhancedMetrics {
        let live = self.tracker.snapshot();
        let uptime_seconds = self.tracker.uptime_seconds();
        let recent_requests = self.audit.get_entries(&crate::audit::AuditFilter {
            limit: 20,
            ..Default::default()
        });
        let recent_errors = self.audit.get_entries(&crate::audit::AuditFilter {
            errors_only: true,
            limit: 20,
            ..Default::default()
        });
        EnhancedMetrics {
            live,
            uptime_seconds,
            recent_requests,
            recent_errors,
            connection_id: Uuid::nil(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Run the reactor loop: on each tick, build one snapshot and fan it out
    /// to every registered client's send channel, non-blocking. A client
    /// whose buffer is full is marked stale and unregistered after the tick
    /// (spec §4.12).
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.broadcast_interval);
        loop {
            ticker.tick().await;
            let mut snapshot = self.build_snapshot();
            let mut stale = Vec::new();
            {
                let state = self.state.lock().await;
                for (id, client) in state.clients.iter() {
                    if client.state == ClientState::Closed {
                        continue;
                    }
                    snapshot.connection_id = *id;
                    let bytes = match serde_json::to_vec(&snapshot) {
                        Ok(b) => b,
                        Err(err) => {
                            tracing::error!(%err, "failed to serialize metrics snapshot");
                            continue;
                        }
                    };
                    if client.sender.try_send(bytes).is_err() {
                        stale.push(*id);
                    }
                }
            }
            for id in stale {
                tracing::warn!(%id, "metrics hub client send buffer full, dropping");
                self.unregister(id).await;
            }
        }
    }

    /// Number of currently registered clients (for tests/observability).
    pub async fn client_count(&self) -> usize {
        self.state
            .lock()
            .await
            .clients
            .values()
            .filter(|c| c.state != ClientState::Closed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_unregister_tracks_client_count() {
        let hub = MetricsHub::new(
            Arc::new(RealtimeTracker::new()),
            Arc::new(AuditRing::new(100, Duration::from_secs(3600))),
            Duration::from_millis(50),
        );
        let handle = hub.register().await;
        assert_eq!(hub.client_count().await, 1);
        hub.unregister(handle.id).await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_registered_client() {
        let hub = MetricsHub::new(
            Arc::new(RealtimeTracker::new()),
            Arc::new(AuditRing::new(100, Duration::from_secs(3600))),
            Duration::from_millis(20),
        );
        let mut handle = hub.register().await;
        let hub_clone = hub.clone();
        tokio::spawn(async move { hub_clone.run().await });

        let msg = tokio::time::timeout(Duration::from_millis(200), handle.receiver.recv())
            .await
            .expect("should receive a broadcast before timeout");
        assert!(msg.is_some());
    }
}
