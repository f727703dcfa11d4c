//! Multi-tier response cache (spec §2, component C8 facade over C1-C7).
//!
//! `CacheSystem` is a one-shot initialization from `CoreConfig`'s cache and
//! redis sections: it builds whichever tiers are enabled, tries to dial
//! Redis if configured, and degrades gracefully (log-but-do-not-fail) if the
//! dial or ping fails within the configured timeout — the system continues
//! running L1-only rather than failing startup (spec §4.8).

pub mod dedup;
pub mod hybrid;
pub mod lru;
pub mod redis;
pub mod semantic;
pub mod streaming;
pub mod ttl_policy;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, RedisConfig};

use self::dedup::Deduplicator;
use self::hybrid::{HybridCache, HybridStats};
use self::lru::{LruStats, LruStore};
use self::redis::RedisAdapter;
use self::semantic::{SemanticConfig as SemanticIndexConfig, SemanticIndex};
use self::streaming::StreamingCache;
use self::ttl_policy::TtlPolicy;

/// Combined cache statistics returned by `GET /v0/management/cache/stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheSystemStats {
    /// L1 hit/miss/size counters.
    pub l1: LruStats,
    /// L2 tier counters, if Redis is configured.
    pub hybrid: Option<HybridStats>,
    /// Whether the semantic-similarity tier is active.
    pub semantic_enabled: bool,
    /// Whether the streaming-event replay tier is active.
    pub streaming_enabled: bool,
}

/// The cache system facade: a single Get/Set surface over whichever tiers
/// are active.
pub struct CacheSystem {
    enabled: bool,
    l1: Arc<LruStore>,
    hybrid: Option<HybridCache>,
    semantic: Option<SemanticIndex>,
    streaming: Option<StreamingCache>,
    ttl_policy: TtlPolicy,
    /// Single-flight coalescing for concurrent identical cache misses
    /// (C6). Exposed directly so upstream dispatch code can wrap its
    /// "cache miss -> call provider -> store" path in one `do_call`.
    pub dedup: Deduplicator<Vec<u8>, String>,
}

impl CacheSystem {
    /// Initialize the facade from config. Redis dial failures degrade to
    /// L1-only rather than propagating an error.
    pub async fn init(cache_config: &CacheConfig, redis_config: &RedisConfig) -> Self {
        let l1 = LruStore::new(
            cache_config.max_entries,
            Duration::from_secs(cache_config.default_ttl_seconds),
        );

        let hybrid = if redis_config.enabled {
            match RedisAdapter::connect(redis_config).await {
                Ok(adapter) => {
                    tracing::info!(address = %redis_config.address, "connected to redis L2 cache");
                    Some(HybridCache::new(l1.clone(), adapter, true, true))
                }
                Err(err) => {
                    tracing::warn!(%err, "redis unavailable at startup, continuing L1-only");
                    None
                }
            }
        } else {
            None
        };

        let semantic = if cache_config.semantic.enabled {
            let semantic_l1 = LruStore::new(cache_config.max_entries, Duration::from_secs(cache_config.default_ttl_seconds));
            Some(SemanticIndex::new(
                SemanticIndexConfig {
                    lowercase: cache_config.semantic.normalize_case,
                    collapse_whitespace: cache_config.semantic.normalize_whitespace,
                    strip_punctuation: false,
                    ngram_size: cache_config.semantic.ngram_size,
                    similarity_threshold: cache_config.semantic.similarity_threshold,
                },
                semantic_l1,
            ))
        } else {
            None
        };

        let streaming = if cache_config.streaming.enabled {
            Some(StreamingCache::new(
                cache_config.streaming.max_entries,
                cache_config.streaming.max_total_size_bytes,
                Duration::from_secs(cache_config.default_ttl_seconds),
            ))
        } else {
            None
        };

        Self {
            enabled: cache_config.enabled,
            l1,
            hybrid,
            semantic,
            streaming,
            ttl_policy: TtlPolicy::from_config(cache_config),
            dedup: Deduplicator::new(),
        }
    }

    /// Exact-match get: hybrid cache if present, else L1-only.
    pub async fn get(&self, model: &str, key: &str) -> Option<Vec<u8>> {
        if !self.enabled || !self.ttl_policy.enabled_for(model) {
            return None;
        }
        match &self.hybrid {
            Some(hybrid) => hybrid.get(model, key).await,
            None => self.l1.get(key),
        }
    }

    /// Exact-match set, honoring per-model TTL overrides.
    pub async fn set(&self, model: &str, key: &str, value: Vec<u8>) {
        if !self.enabled || !self.ttl_policy.enabled_for(model) {
            return;
        }
        let ttl = self.ttl_policy.ttl_for(model);
        match &self.hybrid {
            Some(hybrid) => hybrid.set(model, key, value, ttl).await,
            None => self.l1.set(key, value, ttl),
        }
    }

    /// Semantic lookup, if the semantic tier is enabled.
    pub fn semantic_get(&self, model: &str, prompt: &str) -> Option<Vec<u8>> {
        self.semantic.as_ref()?.get(model, prompt)
    }

    /// Semantic index+store, if the semantic tier is enabled.
    pub fn semantic_set(&self, model: &str, prompt: &str, value: Vec<u8>) {
        if let Some(semantic) = &self.semantic {
            semantic.set(model, prompt, value, self.ttl_policy.ttl_for(model));
        }
    }

    /// The streaming-event cache, if enabled.
    pub fn streaming(&self) -> Option<&StreamingCache> {
        self.streaming.as_ref()
    }

    /// Combined per-tier stats for the management API.
    pub async fn stats(&self) -> CacheSystemStats {
        let hybrid = match &self.hybrid {
            Some(h) => Some(h.stats().await),
            None => None,
        };
        CacheSystemStats {
            l1: self.l1.stats(),
            hybrid,
            semantic_enabled: self.semantic.is_some(),
            streaming_enabled: self.streaming.is_some(),
        }
    }

    /// Clear all active tiers.
    pub async fn clear(&self) {
        match &self.hybrid {
            Some(hybrid) => hybrid.clear().await,
            None => self.l1.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn l1_only_facade_round_trips() {
        let cache_config = CacheConfig::default();
        let redis_config = RedisConfig {
            enabled: false,
            ..RedisConfig::default()
        };
        let system = CacheSystem::init(&cache_config, &redis_config).await;

        system.set("gpt-4", "k", b"v".to_vec()).await;
        assert_eq!(system.get("gpt-4", "k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn disabled_model_never_caches() {
        let mut cache_config = CacheConfig::default();
        cache_config.models.push(crate::config::ModelCacheOverride {
            model: Some("no-cache-model".into()),
            pattern: None,
            ttl_seconds: None,
            enabled: Some(false),
            max_entries: None,
            similarity_threshold: None,
        });
        let redis_config = RedisConfig {
            enabled: false,
            ..RedisConfig::default()
        };
        let system = CacheSystem::init(&cache_config, &redis_config).await;

        system.set("no-cache-model", "k", b"v".to_vec()).await;
        assert_eq!(system.get("no-cache-model", "k").await, None);
    }
}
