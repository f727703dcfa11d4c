//! Audit log ring buffer (C11): a bounded, append-only log with structured
//! filtering, stats, and export.
//!
//! Grounded in `enterprise::audit::event::AuditEvent` for the entry shape
//! and builder pattern, and in `enterprise::audit::logger` for the
//! ring-buffer-with-sweeper structure, adapted to the request-centric
//! entry fields spec §3 calls for (provider/model/auth id/endpoint/status
//! rather than a generic resource/action).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{AuditError, AuditResult};

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Normal, successful request.
    Info,
    /// Degraded but non-fatal, e.g. a 4xx client error.
    Warning,
    /// Request failed or carried an explicit error.
    Error,
    /// Diagnostic detail not meant for routine viewing.
    Debug,
}

/// A single logged request (spec §3 "Audit entry"). Immutable once logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonically increasing id (timestamp + base-36 sequence).
    pub id: String,
    /// When the request was logged.
    pub timestamp: DateTime<Utc>,
    /// Severity, explicit or derived from status/error.
    pub level: AuditLevel,
    /// Upstream provider name (`openai`, `anthropic`, `gemini`, ...).
    pub provider: String,
    /// Model identifier as requested by the client.
    pub model: String,
    /// Credential/auth identifier used for the upstream call.
    pub auth_id: String,
    /// Request path.
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// HTTP status code returned to the client.
    pub status_code: u16,
    /// Total request latency in milliseconds.
    pub latency_ms: u64,
    /// Prompt/input token count.
    pub input_tokens: u64,
    /// Completion/output token count.
    pub output_tokens: u64,
    /// Error message, if any.
    pub error: Option<String>,
    /// Client IP address, if known.
    pub client_ip: Option<String>,
    /// Client `User-Agent` header, if present.
    pub user_agent: Option<String>,
    /// Whether the response was streamed.
    pub streaming: bool,
    /// Whether the response was served from cache.
    pub cached: bool,
    /// Free-form key/value metadata.
    pub metadata: HashMap<String, String>,
}

/// Builder for constructing entries before they're logged, mirroring
/// `AuditEventBuilder`'s fluent style.
#[derive(Default)]
pub struct AuditEntryBuilder {
    provider: String,
    model: String,
    auth_id: String,
    endpoint: String,
    method: String,
    status_code: u16,
    latency_ms: u64,
    input_tokens: u64,
    output_tokens: u64,
    error: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    streaming: bool,
    cached: bool,
    metadata: HashMap<String, String>,
    level: Option<AuditLevel>,
    timestamp: Option<DateTime<Utc>>,
}

impl AuditEntryBuilder {
    /// Start building an entry with all fields defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upstream provider name.
    pub fn provider(mut self, v: impl Into<String>) -> Self {
        self.provider = v.into();
        self
    }
    /// Set the model identifier.
    pub fn model(mut self, v: impl Into<String>) -> Self {
        self.model = v.into();
        self
    }
    /// Set the credential/auth id used for the upstream call.
    pub fn auth_id(mut self, v: impl Into<String>) -> Self {
        self.auth_id = v.into();
        self
    }
    /// Set the request path.
    pub fn endpoint(mut self, v: impl Into<String>) -> Self {
        self.endpoint = v.into();
        self
    }
    /// Set the HTTP method.
    pub fn method(mut self, v: impl Into<String>) -> Self {
        self.method = v.into();
        self
    }
    /// Set the HTTP status code.
    pub fn status_code(mut self, v: u16) -> Self {
        self.status_code = v;
        self
    }
    /// Set the total request latency in milliseconds.
    pub fn latency_ms(mut self, v: u64) -> Self {
        self.latency_ms = v;
        self
    }
    /// Set input/output token counts.
    pub fn tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }
    /// Attach an error message.
    pub fn error(mut self, v: impl Into<String>) -> Self {
        self.error = Some(v.into());
        self
    }
    /// Set the client IP address.
    pub fn client_ip(mut self, v: impl Into<String>) -> Self {
        self.client_ip = Some(v.into());
        self
    }
    /// Set the client `User-Agent` header.
    pub fn user_agent(mut self, v: impl Into<String>) -> Self {
        self.user_agent = Some(v.into());
        self
    }
    /// Mark whether the response was streamed.
    pub fn streaming(mut self, v: bool) -> Self {
        self.streaming = v;
        self
    }
    /// Mark whether the response was served from cache.
    pub fn cached(mut self, v: bool) -> Self {
        self.cached = v;
        self
    }
    /// Attach a metadata key/value pair.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
    /// Force an explicit level instead of deriving one.
    pub fn level(mut self, v: AuditLevel) -> Self {
        self.level = Some(v);
        self
    }

    /// Derive the level if unset: error > status >= 400 -> warning > info
    /// (spec §4.11).
    fn resolve_level(&self) -> AuditLevel {
        if let Some(level) = self.level {
            return level;
        }
        if self.error.is_some() {
            AuditLevel::Error
        } else if self.status_code >= 400 {
            AuditLevel::Warning
        } else {
            AuditLevel::Info
        }
    }

    fn build(self, id: String) -> AuditEntry {
        let level = self.resolve_level();
        AuditEntry {
            id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            level,
            provider: self.provider,
            model: self.model,
            auth_id: self.auth_id,
            endpoint: self.endpoint,
            method: self.method,
            status_code: self.status_code,
            latency_ms: self.latency_ms,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            error: self.error,
            client_ip: self.client_ip,
            user_agent: self.user_agent,
            streaming: self.streaming,
            cached: self.cached,
            metadata: self.metadata,
        }
    }
}

/// Filter predicate for `AuditRing::get_entries` (spec §4.11/§6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditFilter {
    /// Restrict to entries at this severity.
    pub level: Option<AuditLevel>,
    /// Restrict to entries from this provider.
    pub provider: Option<String>,
    /// Restrict to entries for this model.
    pub model: Option<String>,
    /// Restrict to entries with this auth id.
    pub auth_id: Option<String>,
    /// Only entries at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Only entries at or before this time.
    pub until: Option<DateTime<Utc>>,
    /// Only entries that carry an error or a 4xx/5xx status.
    pub errors_only: bool,
    /// Only entries at or above this latency.
    pub min_latency_ms: Option<u64>,
    /// Maximum number of entries to return (0 means the default of 100).
    pub limit: usize,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(provider) = &self.provider {
            if &entry.provider != provider {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if &entry.model != model {
                return false;
            }
        }
        if let Some(auth_id) = &self.auth_id {
            if &entry.auth_id != auth_id {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        if self.errors_only && entry.error.is_none() && entry.status_code < 400 {
            return false;
        }
        if let Some(min_latency) = self.min_latency_ms {
            if entry.latency_ms < min_latency {
                return false;
            }
        }
        true
    }
}

/// Aggregate statistics over the whole ring (spec §4.11 `GetStats`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    /// Number of entries currently in the ring.
    pub total_entries: usize,
    /// Number of entries that carried an error or a 4xx/5xx status.
    pub error_count: usize,
    /// Sum of input+output tokens across all entries.
    pub total_tokens: u64,
    /// Mean latency across all entries.
    pub avg_latency_ms: f64,
    /// Entry counts keyed by provider.
    pub by_provider: HashMap<String, usize>,
    /// Entry counts keyed by model.
    pub by_model: HashMap<String, usize>,
    /// Entry counts keyed by HTTP status code.
    pub by_status: HashMap<u16, usize>,
    /// Entry counts keyed by level.
    pub by_level: HashMap<String, usize>,
}

struct Inner {
    entries: VecDeque<AuditEntry>,
    max_len: usize,
    sequence: u64,
}

/// Bounded append-only audit log.
pub struct AuditRing {
    inner: Mutex<Inner>,
    retention: Duration,
}

impl AuditRing {
    /// Create a ring bounded at `max_len` entries, retained for `retention`.
    pub fn new(max_len: usize, retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(max_len),
                max_len,
                sequence: 0,
            }),
            retention,
        }
    }

    /// Assign a monotonically increasing id: a 14-char `YYYYMMDDhhmmss`
    /// timestamp plus a base-36 sequence (spec §4.11).
    fn next_id(now: DateTime<Utc>, sequence: u64) -> String {
        format!("{}{}", now.format("%Y%m%d%H%M%S"), to_base36(sequence))
    }

    /// Log a built entry. If the ring is full, drops the oldest tenth in
    /// one splice rather than one-by-one (I5).
    pub fn log(&self, builder: AuditEntryBuilder) -> AuditEntry {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let id = Self::next_id(now, inner.sequence);
        inner.sequence += 1;

        let entry = builder.build(id);

        if inner.entries.len() >= inner.max_len {
            let len = inner.entries.len();
            let drop_count = (inner.max_len / 10).max(1).min(len);
            inner.entries.drain(0..drop_count);
        }
        inner.entries.push_back(entry.clone());
        entry
    }

    /// Newest-to-oldest filtered entries, stopping once `filter.limit` is
    /// reached (spec §4.11).
    pub fn get_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let inner = self.inner.lock();
        let limit = if filter.limit == 0 { 100 } else { filter.limit.min(1000) };
        inner
            .entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Compute provider/model/status/level histograms over the whole ring.
    pub fn stats(&self) -> AuditStats {
        let inner = self.inner.lock();
        let mut stats = AuditStats {
            total_entries: inner.entries.len(),
            ..Default::default()
        };
        let mut latency_sum = 0u64;
        for entry in &inner.entries {
            if entry.error.is_some() || entry.status_code >= 400 {
                stats.error_count += 1;
            }
            stats.total_tokens += entry.input_tokens + entry.output_tokens;
            latency_sum += entry.latency_ms;
            *stats.by_provider.entry(entry.provider.clone()).or_insert(0) += 1;
            *stats.by_model.entry(entry.model.clone()).or_insert(0) += 1;
            *stats.by_status.entry(entry.status_code).or_insert(0) += 1;
            *stats.by_level.entry(format!("{:?}", entry.level).to_lowercase()).or_insert(0) += 1;
        }
        stats.avg_latency_ms = latency_sum as f64 / stats.total_entries.max(1) as f64;
        stats
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Serialize all entries as a JSON array (spec §4.11 `Export`).
    pub fn export(&self) -> AuditResult<Vec<u8>> {
        let inner = self.inner.lock();
        let entries: Vec<&AuditEntry> = inner.entries.iter().collect();
        serde_json::to_vec(&entries).map_err(AuditError::from)
    }

    /// Remove entries older than `retention` (called by the periodic
    /// sweeper, spec §4.11 "every ~10 minutes").
    pub fn sweep(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| e.timestamp >= cutoff);
    }

    /// Spawn the periodic sweeper on the current tokio runtime.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(600));
            loop {
                interval.tick().await;
                self.sweep();
            }
        });
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: u16) -> AuditEntryBuilder {
        AuditEntryBuilder::new()
            .provider("openai")
            .model("gpt-4")
            .auth_id("a1")
            .endpoint("/v1/chat/completions")
            .method("POST")
            .status_code(status)
            .latency_ms(100)
    }

    #[test]
    fn level_is_derived_when_unset() {
        let ring = AuditRing::new(100, Duration::from_secs(3600));
        let logged = ring.log(entry(500));
        assert_eq!(logged.level, AuditLevel::Warning);

        let logged = ring.log(entry(200).error("boom"));
        assert_eq!(logged.level, AuditLevel::Error);

        let logged = ring.log(entry(200));
        assert_eq!(logged.level, AuditLevel::Info);
    }

    #[test]
    fn overflow_drops_oldest_tenth_in_one_shot() {
        let ring = AuditRing::new(10, Duration::from_secs(3600));
        for _ in 0..10 {
            ring.log(entry(200));
        }
        ring.log(entry(200));
        let stats = ring.stats();
        assert_eq!(stats.total_entries, 10);
    }

    #[test]
    fn filter_by_level_and_limit() {
        let ring = AuditRing::new(100, Duration::from_secs(3600));
        for _ in 0..5 {
            ring.log(entry(200));
        }
        for _ in 0..3 {
            ring.log(entry(500));
        }
        let filter = AuditFilter {
            level: Some(AuditLevel::Warning),
            limit: 2,
            ..Default::default()
        };
        let entries = ring.get_entries(&filter);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.level == AuditLevel::Warning));
    }

    #[test]
    fn export_round_trips_through_json() {
        let ring = AuditRing::new(100, Duration::from_secs(3600));
        ring.log(entry(200));
        ring.log(entry(404));
        let exported = ring.export().unwrap();
        let parsed: Vec<AuditEntry> = serde_json::from_slice(&exported).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
