//! Provider-facing policy: error classification (C14), retry/backoff (C15),
//! and the credential pool seam those decisions drive.

pub mod error_classifier;
pub mod health;
pub mod retry;

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

pub use error_classifier::{classify, ProviderError, ProviderTag};
pub use health::{ProviderHealthStats, ProviderHealthSummary, ProviderHealthTracker};
pub use retry::{backoff, should_retry};

/// Opaque handle for one provider credential (API key, OAuth token, etc).
/// Translation into an actual auth header is out of scope here — this
/// surface only tracks which credential the retry/failover loop should try
/// next (spec §1 non-goal on provider translation; SPEC_FULL §4.17).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Healthy,
    RateLimited,
    Unhealthy,
}

struct CredentialState {
    health: Health,
    rate_limited_until: Option<Instant>,
}

/// The minimal seam the retry/failover loop uses to pick the next
/// credential and report back the outcome of a classified error, without
/// implementing actual credential storage or HTTP dispatch.
pub trait CredentialPool: Send + Sync {
    /// Pick the next candidate for `provider`, skipping rate-limited or
    /// unhealthy credentials.
    fn next_credential(&self, provider: ProviderTag) -> Option<CredentialId>;
    /// Mark a credential rate-limited until the given instant.
    fn mark_rate_limited(&self, provider: ProviderTag, credential: &CredentialId, until: Instant);
    /// Mark a credential healthy again (e.g. after a successful call).
    fn mark_healthy(&self, provider: ProviderTag, credential: &CredentialId);
    /// Mark a credential unhealthy (e.g. repeated 5xx or auth failure).
    fn mark_unhealthy(&self, provider: ProviderTag, credential: &CredentialId);
}

/// An in-memory round-robin `CredentialPool`, seeded with a static set of
/// credential IDs per provider.
pub struct InMemoryCredentialPool {
    credentials: Mutex<HashMap<ProviderTag, Vec<CredentialId>>>,
    state: Mutex<HashMap<(ProviderTag, CredentialId), CredentialState>>,
}

impl InMemoryCredentialPool {
    /// Seed the pool with a fixed set of credentials per provider.
    pub fn new(seed: HashMap<ProviderTag, Vec<CredentialId>>) -> Self {
        Self {
            credentials: Mutex::new(seed),
            state: Mutex::new(HashMap::new()),
        }
    }

    fn is_available(&self, provider: ProviderTag, credential: &CredentialId) -> bool {
        let state = self.state.lock();
        match state.get(&(provider, credential.clone())) {
            None => true,
            Some(entry) => match entry.health {
                Health::Unhealthy => false,
                Health::RateLimited => entry.rate_limited_until.map(|until| Instant::now() >= until).unwrap_or(true),
                Health::Healthy => true,
            },
        }
    }
}

impl CredentialPool for InMemoryCredentialPool {
    fn next_credential(&self, provider: ProviderTag) -> Option<CredentialId> {
        let credentials = self.credentials.lock();
        credentials
            .get(&provider)?
            .iter()
            .find(|cred| self.is_available(provider, cred))
            .cloned()
    }

    fn mark_rate_limited(&self, provider: ProviderTag, credential: &CredentialId, until: Instant) {
        self.state.lock().insert(
            (provider, credential.clone()),
            CredentialState {
                health: Health::RateLimited,
                rate_limited_until: Some(until),
            },
        );
    }

    fn mark_healthy(&self, provider: ProviderTag, credential: &CredentialId) {
        self.state.lock().insert(
            (provider, credential.clone()),
            CredentialState {
                health: Health::Healthy,
                rate_limited_until: None,
            },
        );
    }

    fn mark_unhealthy(&self, provider: ProviderTag, credential: &CredentialId) {
        self.state.lock().insert(
            (provider, credential.clone()),
            CredentialState {
                health: Health::Unhealthy,
                rate_limited_until: None,
            },
        );
    }
}

/// Apply a classified error's outcome to the credential pool: rate-limited
/// and failover-eligible errors retire the credential temporarily or
/// permanently so the next `next_credential` call skips it (spec §4.14,
/// §4.15 "failover signals the surrounding dispatch to select a different
/// credential").
pub fn apply_outcome(pool: &dyn CredentialPool, provider: ProviderTag, credential: &CredentialId, err: &ProviderError) {
    if !err.should_failover {
        return;
    }
    match err.retry_after {
        Some(delay) => pool.mark_rate_limited(provider, credential, Instant::now() + delay),
        None => pool.mark_unhealthy(provider, credential),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool_with_two_keys() -> InMemoryCredentialPool {
        let mut seed = HashMap::new();
        seed.insert(
            ProviderTag::OpenAi,
            vec![CredentialId("key-a".into()), CredentialId("key-b".into())],
        );
        InMemoryCredentialPool::new(seed)
    }

    #[test]
    fn rate_limited_credential_is_skipped_until_expiry() {
        let pool = pool_with_two_keys();
        let key_a = CredentialId("key-a".into());
        pool.mark_rate_limited(ProviderTag::OpenAi, &key_a, Instant::now() + Duration::from_secs(60));

        let next = pool.next_credential(ProviderTag::OpenAi);
        assert_eq!(next, Some(CredentialId("key-b".into())));
    }

    #[test]
    fn unhealthy_credential_never_selected_again_without_recovery() {
        let pool = pool_with_two_keys();
        let key_a = CredentialId("key-a".into());
        let key_b = CredentialId("key-b".into());
        pool.mark_unhealthy(ProviderTag::OpenAi, &key_a);
        pool.mark_unhealthy(ProviderTag::OpenAi, &key_b);

        assert_eq!(pool.next_credential(ProviderTag::OpenAi), None);
    }

    #[test]
    fn apply_outcome_ignores_non_failover_errors() {
        let pool = pool_with_two_keys();
        let key_a = CredentialId("key-a".into());
        let err = ProviderError {
            provider: ProviderTag::OpenAi,
            status: 400,
            code: "bad_request".into(),
            message: "x".into(),
            retryable: false,
            should_failover: false,
            retry_after: None,
        };
        apply_outcome(&pool, ProviderTag::OpenAi, &key_a, &err);
        assert_eq!(pool.next_credential(ProviderTag::OpenAi), Some(key_a));
    }
}
