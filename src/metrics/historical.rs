//! Historical buckets (C10): rolling second/minute/hour/day aggregate
//! windows.
//!
//! Four fixed-length ring windows (60 seconds, 60 minutes, 24 hours, 30
//! days); each `Record` lands in whichever slot of each window contains the
//! current time.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// One aggregate window slot (spec §3 "Metric bucket").
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricBucket {
    /// Unix-seconds start of this window.
    pub window_start: u64,
    /// Requests observed in this window.
    pub requests: u64,
    /// Total tokens observed in this window.
    pub tokens: u64,
    /// Input tokens observed in this window.
    pub input_tokens: u64,
    /// Output tokens observed in this window.
    pub output_tokens: u64,
    /// Successful requests in this window.
    pub success_count: u64,
    /// Failed requests in this window.
    pub failure_count: u64,
    latency_sum: u64,
    observation_count: u64,
}

impl MetricBucket {
    /// avg_latency = sum / max(observation_count, 1) (spec §3).
    pub fn avg_latency_ms(&self) -> f64 {
        self.latency_sum as f64 / self.observation_count.max(1) as f64
    }

    fn record(&mut self, tokens: u64, input_tokens: u64, output_tokens: u64, latency_ms: u64, success: bool) {
        self.requests += 1;
        self.tokens += tokens;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.latency_sum += latency_ms;
        self.observation_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }
}

struct Window {
    slot_seconds: u64,
    buckets: Vec<MetricBucket>,
}

impl Window {
    fn new(slot_seconds: u64, len: usize) -> Self {
        Self {
            slot_seconds,
            buckets: vec![MetricBucket::default(); len],
        }
    }

    fn slot_for(&self, now_secs: u64) -> usize {
        ((now_secs / self.slot_seconds) % self.buckets.len() as u64) as usize
    }

    fn record(&mut self, now_secs: u64, tokens: u64, input_tokens: u64, output_tokens: u64, latency_ms: u64, success: bool) {
        let window_start = (now_secs / self.slot_seconds) * self.slot_seconds;
        let idx = self.slot_for(now_secs);
        if self.buckets[idx].window_start != window_start {
            self.buckets[idx] = MetricBucket {
                window_start,
                ..Default::default()
            };
        }
        self.buckets[idx].record(tokens, input_tokens, output_tokens, latency_ms, success);
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Rolling second/minute/hour/day historical aggregates.
pub struct HistoricalBuckets {
    seconds: Mutex<Window>,
    minutes: Mutex<Window>,
    hours: Mutex<Window>,
    days: Mutex<Window>,
}

impl Default for HistoricalBuckets {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalBuckets {
    /// Create empty second/minute/hour/day windows.
    pub fn new() -> Self {
        Self {
            seconds: Mutex::new(Window::new(1, 60)),
            minutes: Mutex::new(Window::new(60, 60)),
            hours: Mutex::new(Window::new(3600, 24)),
            days: Mutex::new(Window::new(86_400, 30)),
        }
    }

    /// Record one completed request into every window at once.
    pub fn record(&self, tokens: u64, input_tokens: u64, output_tokens: u64, latency_ms: u64, success: bool) {
        let now = unix_secs();
        self.seconds.lock().record(now, tokens, input_tokens, output_tokens, latency_ms, success);
        self.minutes.lock().record(now, tokens, input_tokens, output_tokens, latency_ms, success);
        self.hours.lock().record(now, tokens, input_tokens, output_tokens, latency_ms, success);
        self.days.lock().record(now, tokens, input_tokens, output_tokens, latency_ms, success);
    }

    /// Snapshot whichever windows are requested (spec §4.10).
    pub fn snapshot(
        &self,
        include_seconds: bool,
        include_minutes: bool,
        include_hours: bool,
        include_days: bool,
    ) -> HistoricalSnapshot {
        HistoricalSnapshot {
            seconds: include_seconds.then(|| self.seconds.lock().buckets.clone()),
            minutes: include_minutes.then(|| self.minutes.lock().buckets.clone()),
            hours: include_hours.then(|| self.hours.lock().buckets.clone()),
            days: include_days.then(|| self.days.lock().buckets.clone()),
        }
    }
}

/// Result of `HistoricalBuckets::snapshot`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoricalSnapshot {
    /// Last 60 one-second buckets, if requested.
    pub seconds: Option<Vec<MetricBucket>>,
    /// Last 60 one-minute buckets, if requested.
    pub minutes: Option<Vec<MetricBucket>>,
    /// Last 24 one-hour buckets, if requested.
    pub hours: Option<Vec<MetricBucket>>,
    /// Last 30 one-day buckets, if requested.
    pub days: Option<Vec<MetricBucket>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_lands_in_every_window() {
        let buckets = HistoricalBuckets::new();
        buckets.record(10, 4, 6, 50, true);
        let snapshot = buckets.snapshot(true, true, true, true);

        let total_requests = |v: &Option<Vec<MetricBucket>>| -> u64 {
            v.as_ref().unwrap().iter().map(|b| b.requests).sum()
        };
        assert_eq!(total_requests(&snapshot.seconds), 1);
        assert_eq!(total_requests(&snapshot.minutes), 1);
        assert_eq!(total_requests(&snapshot.hours), 1);
        assert_eq!(total_requests(&snapshot.days), 1);
    }

    #[test]
    fn avg_latency_divides_by_observation_count() {
        let mut bucket = MetricBucket::default();
        bucket.record(10, 0, 0, 100, true);
        bucket.record(10, 0, 0, 200, true);
        assert_eq!(bucket.avg_latency_ms(), 150.0);
    }

    #[test]
    fn requested_windows_only_are_populated() {
        let buckets = HistoricalBuckets::new();
        buckets.record(1, 0, 0, 1, true);
        let snapshot = buckets.snapshot(true, false, false, false);
        assert!(snapshot.seconds.is_some());
        assert!(snapshot.minutes.is_none());
    }
}
