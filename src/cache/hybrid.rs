//! Hybrid cache (C3): L1 (`LruStore`) in front of L2 (`RedisAdapter`) with
//! write-through and read-through policies.
//!
//! L2 calls happen outside L1's lock so that network I/O to Redis never
//! blocks other L1 traffic (spec §5). A value served from L2 is always
//! backfilled into L1 before being returned (I7).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::cache::lru::LruStore;
use crate::cache::redis::RedisAdapter;

/// Hybrid-cache statistics, exposed as a sub-struct of the facade's combined
/// stats (spec §4.8).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HybridStats {
    /// Hits served from L1.
    pub l1_hits: u64,
    /// Hits served from L2 (and backfilled into L1).
    pub l2_hits: u64,
    /// Misses across both tiers.
    pub misses: u64,
    /// L2 operation failures.
    pub l2_errors: u64,
    /// Whether L2 is currently reachable.
    pub connected: bool,
}

/// L1-in-front-of-L2 cache with configurable write-through/read-through.
pub struct HybridCache {
    l1: Arc<LruStore>,
    l2: RedisAdapter,
    key_prefix: String,
    write_through: bool,
    read_through: bool,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    l2_errors: AtomicU64,
}

impl HybridCache {
    /// Compose an L1/L2 pair under the given write-through/read-through
    /// policy.
    pub fn new(l1: Arc<LruStore>, l2: RedisAdapter, write_through: bool, read_through: bool) -> Self {
        let key_prefix = l2.key_prefix().to_string();
        Self {
            l1,
            l2,
            key_prefix,
            write_through,
            read_through,
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            l2_errors: AtomicU64::new(0),
        }
    }

    /// Form the L2 key as `<prefix>:<model>:<hash(key)>` (spec §4.3); L1
    /// keeps using the opaque hash directly.
    fn l2_key(&self, model: &str, key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let hash = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        format!("{}:{model}:{hash}", self.key_prefix)
    }

    /// `Get`: L1 first; on L1 miss with read-through enabled, consult L2 and
    /// backfill L1 on hit (I7).
    pub async fn get(&self, model: &str, key: &str) -> Option<Vec<u8>> {
        if let Some(value) = self.l1.get(key) {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        if !self.read_through {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let l2_key = self.l2_key(model, key);
        match self.l2.get(&l2_key).await {
            Ok(Some(value)) => {
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                self.l1.set(key, value.clone(), Duration::from_secs(60));
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                tracing::warn!(%err, "hybrid cache L2 get failed, degrading to L1-only result");
                self.l2_errors.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// `Set`: writes L1 always; writes L2 too when write-through is enabled.
    /// An L2 failure does not fail the call (spec §4.3) — it still counts an
    /// error for observability.
    pub async fn set(&self, model: &str, key: &str, value: Vec<u8>, ttl: Duration) {
        self.l1.set(key, value.clone(), ttl);

        if self.write_through {
            let l2_key = self.l2_key(model, key);
            if let Err(err) = self.l2.set(&l2_key, &value, ttl).await {
                tracing::warn!(%err, "hybrid cache L2 write-through failed");
                self.l2_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Best-effort clear: lists L2 keys under the prefix and deletes them in
    /// a loop. Failures bump the error counter but never fail the call
    /// (spec §4.3).
    pub async fn clear(&self) {
        self.l1.clear();

        let pattern = format!("{}:*", self.key_prefix);
        match self.l2.keys(&pattern).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(err) = self.l2.delete(&key).await {
                        tracing::warn!(%err, %key, "hybrid cache clear: L2 delete failed");
                        self.l2_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "hybrid cache clear: L2 keys listing failed");
                self.l2_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current tier counters plus an up-to-date L2 reachability check.
    pub async fn stats(&self) -> HybridStats {
        let connected = self.l2.ping().await.is_ok();
        HybridStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
            connected,
        }
    }
}
