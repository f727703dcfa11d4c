//! Per-provider health aggregation backing `GET /v0/management/providers/health`
//! (spec §6).
//!
//! Mirrors `RealtimeTracker`'s counters-plus-latency-ring shape (spec §4.9),
//! just keyed per provider instead of global, so dispatch code can report
//! one outcome per upstream call and the management API can read back
//! per-provider error rates and latency percentiles without touching the
//! audit ring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::provider::error_classifier::ProviderTag;

const LATENCY_SAMPLE_CAP: usize = 500;

struct ProviderCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latencies: RwLock<Vec<u64>>,
    latency_next: AtomicU64,
    last_error_time: RwLock<Option<DateTime<Utc>>>,
    last_success_time: RwLock<Option<DateTime<Utc>>>,
    rate_limited_until: RwLock<Option<DateTime<Utc>>>,
}

impl Default for ProviderCounters {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latencies: RwLock::new(vec![0; LATENCY_SAMPLE_CAP]),
            latency_next: AtomicU64::new(0),
            last_error_time: RwLock::new(None),
            last_success_time: RwLock::new(None),
            rate_limited_until: RwLock::new(None),
        }
    }
}

/// A provider's health as surfaced to the dashboard (spec §6
/// `/v0/management/providers/health`).
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthStats {
    /// Lowercased provider tag name.
    pub name: String,
    /// Whether the provider is currently considered usable for routing.
    pub healthy: bool,
    /// Total requests observed.
    pub requests: u64,
    /// Total failed requests observed.
    pub errors: u64,
    /// `errors / requests * 100`.
    pub error_rate_percent: f64,
    /// Mean latency across observed requests.
    pub avg_latency_ms: f64,
    /// 95th percentile latency over the sampled latency window.
    pub p95_latency_ms: u64,
    /// Number of credentials configured for this provider.
    pub credentials: usize,
    /// Whether the provider is currently within a rate-limit cooldown.
    pub rate_limited: bool,
    /// Timestamp of the most recent error, if any.
    pub last_error_time: Option<DateTime<Utc>>,
    /// Timestamp of the most recent success, if any.
    pub last_success_time: Option<DateTime<Utc>>,
}

/// Aggregate across every tracked provider (spec §6 aggregate fields).
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthSummary {
    /// Number of distinct providers tracked.
    pub total_providers: usize,
    /// Number of providers currently healthy.
    pub healthy_count: usize,
    /// Number of providers currently unhealthy.
    pub unhealthy_count: usize,
    /// Mean error rate across all tracked providers.
    pub avg_error_rate_percent: f64,
    /// Per-provider stats, sorted by name.
    pub providers: Vec<ProviderHealthStats>,
}

/// Tracks per-provider request/error/latency counters fed by the dispatch
/// loop's classified outcomes (spec §1 item 4, §6 `providers/health`).
pub struct ProviderHealthTracker {
    providers: RwLock<HashMap<ProviderTag, ProviderCounters>>,
    credential_counts: RwLock<HashMap<ProviderTag, usize>>,
}

impl Default for ProviderHealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderHealthTracker {
    /// Create a tracker with no providers recorded yet.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            credential_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Declare how many credentials a provider has configured, for the
    /// `credentials` field in the health snapshot.
    pub fn set_credential_count(&self, provider: ProviderTag, count: usize) {
        self.credential_counts.write().insert(provider, count);
    }

    fn counters<'a>(&'a self, providers: &'a mut HashMap<ProviderTag, ProviderCounters>, provider: ProviderTag) {
        providers.entry(provider).or_default();
    }

    /// Record one completed upstream call's outcome.
    pub fn record(&self, provider: ProviderTag, latency_ms: u64, success: bool, retry_after: Option<Duration>) {
        {
            let mut providers = self.providers.write();
            self.counters(&mut providers, provider);
        }
        let providers = self.providers.read();
        let counters = providers.get(&provider).expect("inserted above");

        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let idx = counters.latency_next.fetch_add(1, Ordering::Relaxed);
        counters.latencies.write()[(idx as usize) % LATENCY_SAMPLE_CAP] = latency_ms;

        let now = Utc::now();
        if success {
            *counters.last_success_time.write() = Some(now);
        } else {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            *counters.last_error_time.write() = Some(now);
        }
        if let Some(delay) = retry_after {
            *counters.rate_limited_until.write() = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        }
    }

    /// Snapshot every tracked provider plus an aggregate summary (spec §6).
    pub fn snapshot(&self) -> ProviderHealthSummary {
        let providers = self.providers.read();
        let credential_counts = self.credential_counts.read();
        let now = Utc::now();

        let mut stats: Vec<ProviderHealthStats> = providers
            .iter()
            .map(|(tag, counters)| {
                let requests = counters.requests.load(Ordering::Relaxed);
                let errors = counters.errors.load(Ordering::Relaxed);
                let sum = counters.latency_sum_ms.load(Ordering::Relaxed);
                let n = counters.latency_next.load(Ordering::Relaxed).min(LATENCY_SAMPLE_CAP as u64) as usize;
                let mut latencies = counters.latencies.read()[..n].to_vec();
                latencies.sort_unstable();
                let p95 = if latencies.is_empty() {
                    0
                } else {
                    latencies[((latencies.len() as f64 * 0.95) as usize).min(latencies.len() - 1)]
                };
                let rate_limited = counters
                    .rate_limited_until
                    .read()
                    .map(|until| now < until)
                    .unwrap_or(false);

                ProviderHealthStats {
                    name: format!("{tag:?}").to_lowercase(),
                    healthy: !rate_limited && (requests == 0 || errors * 100 / requests.max(1) < 50),
                    requests,
                    errors,
                    error_rate_percent: errors as f64 / requests.max(1) as f64 * 100.0,
                    avg_latency_ms: sum as f64 / requests.max(1) as f64,
                    p95_latency_ms: p95,
                    credentials: credential_counts.get(tag).copied().unwrap_or(0),
                    rate_limited,
                    last_error_time: *counters.last_error_time.read(),
                    last_success_time: *counters.last_success_time.read(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));

        let healthy_count = stats.iter().filter(|s| s.healthy).count();
        let unhealthy_count = stats.len() - healthy_count;
        let avg_error_rate_percent = if stats.is_empty() {
            0.0
        } else {
            stats.iter().map(|s| s.error_rate_percent).sum::<f64>() / stats.len() as f64
        };

        ProviderHealthSummary {
            total_providers: stats.len(),
            healthy_count,
            unhealthy_count,
            avg_error_rate_percent,
            providers: stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_provider_has_zero_error_rate() {
        let tracker = ProviderHealthTracker::new();
        tracker.record(ProviderTag::OpenAi, 100, true, None);
        tracker.record(ProviderTag::OpenAi, 200, true, None);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.providers.len(), 1);
        assert_eq!(snapshot.providers[0].error_rate_percent, 0.0);
        assert!(snapshot.providers[0].healthy);
    }

    #[test]
    fn majority_errors_marks_provider_unhealthy() {
        let tracker = ProviderHealthTracker::new();
        for _ in 0..3 {
            tracker.record(ProviderTag::Anthropic, 50, false, None);
        }
        tracker.record(ProviderTag::Anthropic, 50, true, None);
        let snapshot = tracker.snapshot();
        assert!(!snapshot.providers[0].healthy);
        assert_eq!(snapshot.unhealthy_count, 1);
    }

    #[test]
    fn rate_limited_provider_is_marked_until_expiry() {
        let tracker = ProviderHealthTracker::new();
        tracker.record(ProviderTag::Gemini, 50, false, Some(Duration::from_secs(30)));
        let snapshot = tracker.snapshot();
        assert!(snapshot.providers[0].rate_limited);
    }

    #[test]
    fn credential_count_is_reported() {
        let tracker = ProviderHealthTracker::new();
        tracker.set_credential_count(ProviderTag::OpenAi, 4);
        tracker.record(ProviderTag::OpenAi, 10, true, None);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.providers[0].credentials, 4);
    }
}
