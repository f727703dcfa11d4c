//! Configuration structs consumed by the core (spec §6).
//!
//! Loading these from YAML is an external concern (out of scope); what the
//! core owns is the shape of the config and sane defaults, the way
//! `enterprise::config::EnterpriseConfig` owns its shape and a `Default` impl
//! while leaving the on-disk format to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-model (or pattern) TTL/enablement override (see `cache::ttl_policy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCacheOverride {
    /// Exact model name, or a glob pattern if `pattern` is set instead.
    pub model: Option<String>,
    /// Glob pattern (`*` any sequence, `?` any single char) matched against
    /// the model name when `model` is absent.
    pub pattern: Option<String>,
    /// TTL override in seconds.
    pub ttl_seconds: Option<u64>,
    /// Explicit enable/disable; `Some(false)` always wins over a default of
    /// `true` (spec §4.7 composition rule).
    pub enabled: Option<bool>,
    /// Per-model L1 capacity override (reserved for future tiering; not
    /// currently consumed by `ttl_policy` but kept in the config shape per
    /// spec §6).
    pub max_entries: Option<usize>,
    /// Per-model semantic similarity threshold override.
    pub similarity_threshold: Option<f64>,
}

/// Semantic (similarity) cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Whether the semantic tier is active.
    pub enabled: bool,
    /// Minimum Jaccard similarity for a hit.
    pub similarity_threshold: f64,
    /// N-gram length used for similarity.
    pub ngram_size: usize,
    /// Lowercase text before indexing.
    pub normalize_case: bool,
    /// Collapse whitespace runs before indexing.
    pub normalize_whitespace: bool,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: 0.85,
            ngram_size: 3,
            normalize_case: true,
            normalize_whitespace: true,
        }
    }
}

/// Streaming-event replay cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Whether the streaming replay cache is active.
    pub enabled: bool,
    /// Maximum number of recorded streams held at once.
    pub max_entries: usize,
    /// Maximum size of a single event's payload.
    pub max_event_size_bytes: usize,
    /// Maximum total recorded size per stream before further events drop.
    pub max_total_size_bytes: usize,
    /// Whether replay sleeps the recorded inter-event delay.
    pub preserve_timings: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 1_000,
            max_event_size_bytes: 64 * 1024,
            max_total_size_bytes: 4 * 1024 * 1024,
            preserve_timings: false,
        }
    }
}

/// Top-level cache configuration (spec §6 `cache:`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is active at all.
    pub enabled: bool,
    /// Default TTL applied when no model override matches.
    pub default_ttl_seconds: u64,
    /// L1 LRU capacity.
    pub max_entries: usize,
    /// Semantic tier configuration.
    pub semantic: SemanticConfig,
    /// Streaming replay tier configuration.
    pub streaming: StreamingConfig,
    /// Per-model/pattern TTL and enablement overrides.
    pub models: Vec<ModelCacheOverride>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: 3600,
            max_entries: 10_000,
            semantic: SemanticConfig::default(),
            streaming: StreamingConfig::default(),
            models: Vec::new(),
        }
    }
}

/// Redis L2 tier configuration (spec §6 `redis:`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Whether the L2 Redis tier is active.
    pub enabled: bool,
    /// `host:port` of the Redis server.
    pub address: String,
    /// Optional auth password.
    pub password: Option<String>,
    /// Logical database index.
    pub database: i64,
    /// Prefix applied to every key before entering Redis.
    pub key_prefix: String,
    /// Default TTL for entries written to Redis.
    pub default_ttl_seconds: u64,
    /// Maximum client-side retries (unused by the adapter itself; see §4.2).
    pub max_retries: u32,
    /// Connection pool size.
    pub pool_size: u32,
    /// Dial timeout in milliseconds.
    pub dial_timeout_ms: u64,
    /// Read-operation timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Write-operation timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Whether to connect over TLS.
    pub enable_tls: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:6379".to_string(),
            password: None,
            database: 0,
            key_prefix: "llmproxy".to_string(),
            default_ttl_seconds: 3600,
            max_retries: 0,
            pool_size: 10,
            dial_timeout_ms: 500,
            read_timeout_ms: 250,
            write_timeout_ms: 250,
            enable_tls: false,
        }
    }
}

/// Retry/backoff policy configuration (spec §6 `retry:`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts before giving up.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub initial_delay_ms: u64,
    /// Ceiling applied to the computed backoff.
    pub max_delay_ms: u64,
    /// Exponential growth factor between attempts.
    pub multiplier: f64,
    /// Jitter factor applied to the computed delay.
    pub jitter: f64,
    /// Additional status codes treated as retryable regardless of
    /// classifier output.
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            retryable_status_codes: vec![429, 500, 502, 503, 504, 529],
        }
    }
}

/// Truncation strategy selector for the context-window manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextStrategy {
    /// Keep a leading system message plus the last N messages.
    SlidingWindow,
    /// Score every message and greedily keep the highest-priority subset.
    Priority,
}

/// What to always retain regardless of strategy (spec §4.16).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlwaysKeep {
    /// Always retain a leading system message.
    pub system_prompt: bool,
    /// Always retain tool-use/tool-result blocks.
    pub tool_definitions: bool,
    /// Number of most-recent messages to always retain.
    pub recent_messages: usize,
}

impl Default for AlwaysKeep {
    fn default() -> Self {
        Self {
            system_prompt: true,
            tool_definitions: true,
            recent_messages: 3,
        }
    }
}

/// Context-window management configuration (spec §6 `context:`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Whether context-window truncation is active.
    pub enabled: bool,
    /// Which truncation strategy to apply.
    pub strategy: ContextStrategy,
    /// Token limit per model name.
    pub model_limits: HashMap<String, usize>,
    /// What to always retain regardless of strategy.
    pub always_keep: AlwaysKeep,
    /// Headroom reserved for the response, tool definitions, and the system
    /// prompt, subtracted from a model's raw limit to get the budget
    /// available for message history (spec §4.16 `availableTokens`).
    pub reserved_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: ContextStrategy::SlidingWindow,
            model_limits: HashMap::new(),
            always_keep: AlwaysKeep::default(),
            reserved_tokens: 1024,
        }
    }
}

/// Metrics time-series persistence configuration (spec §6 `metrics_db:`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsDbConfig {
    /// Whether time-series persistence is active.
    pub enabled: bool,
    /// Postgres connection string.
    pub dsn: String,
    /// Connection pool size.
    pub max_connections: u32,
    /// Days of daily aggregates to retain.
    pub retention_days: u32,
    /// Seconds between scheduled flush/rollup ticks.
    pub flush_interval_seconds: u64,
    /// Rows written per batch.
    pub batch_size: usize,
}

impl Default for MetricsDbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dsn: String::new(),
            max_connections: 10,
            retention_days: 30,
            flush_interval_seconds: 60,
            batch_size: 100,
        }
    }
}

/// Root configuration object for the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Cache tier configuration.
    pub cache: CacheConfig,
    /// Redis L2 tier configuration.
    pub redis: RedisConfig,
    /// Retry/backoff policy configuration.
    pub retry: RetryConfig,
    /// Context-window manager configuration.
    pub context: ContextConfig,
    /// Metrics time-series persistence configuration.
    pub metrics_db: MetricsDbConfig,
}

impl CoreConfig {
    /// Parse a config from a JSON string. YAML loading is an external
    /// concern; callers that load YAML convert to this shape themselves.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Load a config from a JSON file on disk, mirroring
    /// `EnterpriseConfig::from_file`.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&contents)?)
    }
}
