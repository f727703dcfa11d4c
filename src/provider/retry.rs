//! Retry policy (C15): exponential backoff with deterministic jitter and
//! per-code eligibility, driven by the classified provider error (C14).

use std::time::Duration;

use crate::config::RetryConfig;
use crate::provider::error_classifier::ProviderError;

/// Whether a classified error should be retried at the given attempt
/// number (1-indexed; spec §4.15).
pub fn should_retry(config: &RetryConfig, err: &ProviderError, attempt: u32) -> bool {
    let retryable = err.retryable || config.retryable_status_codes.contains(&err.status);
    retryable && attempt < config.max_attempts
}

/// Compute the delay before the next attempt (spec §4.15):
/// `min(initial * multiplier^(attempt-1), max_delay) + deterministic_jitter`,
/// where `jitter = delay * jitter_factor * ((attempt mod 3) / 2)`.
/// A server-supplied `retry-after` always overrides the computed value
/// verbatim rather than being combined with it (spec §4.15, REDESIGN FLAGS).
pub fn backoff(config: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(server_delay) = retry_after {
        return server_delay;
    }

    let base = (config.initial_delay_ms as f64) * config.multiplier.powi(attempt.saturating_sub(1) as i32);
    let capped = base.min(config.max_delay_ms as f64);
    let jitter = capped * config.jitter * ((attempt % 3) as f64 / 2.0);
    Duration::from_millis((capped + jitter).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::error_classifier::ProviderTag;

    fn config() -> RetryConfig {
        RetryConfig::default()
    }

    fn err(status: u16, retryable: bool) -> ProviderError {
        ProviderError {
            provider: ProviderTag::Unknown,
            status,
            code: "x".into(),
            message: "x".into(),
            retryable,
            should_failover: false,
            retry_after: None,
        }
    }

    #[test]
    fn retries_stop_at_max_attempts() {
        let config = config();
        assert!(should_retry(&config, &err(500, true), config.max_attempts - 1));
        assert!(!should_retry(&config, &err(500, true), config.max_attempts));
    }

    #[test]
    fn non_retryable_status_never_retries() {
        let config = config();
        assert!(!should_retry(&config, &err(400, false), 1));
    }

    #[test]
    fn status_in_configured_retryable_set_retries_even_if_not_flagged() {
        let mut config = config();
        config.retryable_status_codes = vec![418];
        assert!(should_retry(&config, &err(418, false), 1));
    }

    #[test]
    fn backoff_monotonicity_without_jitter_holds_up_to_cap() {
        // P10: backoff(n+1) >= backoff(n) up to max_delay, holding jitter at
        // zero so the comparison is deterministic.
        let mut config = config();
        config.jitter = 0.0;
        let mut previous = Duration::from_millis(0);
        for attempt in 1..10 {
            let delay = backoff(&config, attempt, None);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn backoff_never_exceeds_max_delay_plus_jitter_bound() {
        let config = config();
        for attempt in 1..20 {
            let delay = backoff(&config, attempt, None);
            let max_possible = config.max_delay_ms as f64 * (1.0 + config.jitter);
            assert!(delay.as_millis() as f64 <= max_possible + 1.0);
        }
    }

    #[test]
    fn server_retry_after_overrides_computed_backoff_verbatim() {
        let config = config();
        let delay = backoff(&config, 1, Some(Duration::from_secs(7)));
        assert_eq!(delay, Duration::from_secs(7));
    }
}
