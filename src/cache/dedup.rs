//! Single-flight request deduplicator (C6).
//!
//! For a given key, at most one call to the underlying function runs
//! concurrently; every other concurrent caller waits for it and receives
//! the same `(value, error)` pair (I6). The map mutex is held only long
//! enough to register or remove an in-flight record — the shared function
//! itself runs unlocked, and the deduplicator does not propagate
//! cancellation between waiters (spec §5): one caller giving up does not
//! abort the others.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

type Shared<V, E> = Arc<Result<V, E>>;

struct InFlight<V, E> {
    sender: broadcast::Sender<Shared<V, E>>,
}

/// Deduplicates concurrent calls keyed by an opaque string.
pub struct Deduplicator<V, E> {
    inflight: Mutex<HashMap<String, InFlight<V, E>>>,
}

impl<V, E> Default for Deduplicator<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Deduplicator<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty deduplicator.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Join (or start) a single flight for `key`, running `fn_` if this is
    /// the first caller. A panic inside `fn_` is caught at this boundary so
    /// the in-flight record is always removed (spec §4.6), and the panic is
    /// re-raised for the caller that triggered it.
    pub async fn do_call<F, Fut>(&self, key: &str, fn_: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        enum Role<V, E> {
            Leader(broadcast::Sender<Shared<V, E>>),
            Follower(broadcast::Receiver<Shared<V, E>>),
        }

        let role = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(key) {
                Role::Follower(existing.sender.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                inflight.insert(
                    key.to_string(),
                    InFlight {
                        sender: tx.clone(),
                    },
                );
                Role::Leader(tx)
            }
        };

        match role {
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(shared) => unwrap_shared(shared),
                Err(_) => {
                    // Sender dropped before broadcasting (panic path);
                    // surface as if we'd raced the leader's cleanup and lost.
                    panic!("single-flight leader disappeared without a result");
                }
            },
            Role::Leader(tx) => {
                let key_owned = key.to_string();
                let result = std::panic::AssertUnwindSafe(fn_())
                    .catch_unwind()
                    .await;

                self.inflight.lock().remove(&key_owned);

                match result {
                    Ok(value) => {
                        let shared = Arc::new(value);
                        let _ = tx.send(shared.clone());
                        unwrap_shared(shared)
                    }
                    Err(panic) => {
                        drop(tx);
                        std::panic::resume_unwind(panic);
                    }
                }
            }
        }
    }
}

fn unwrap_shared<V: Clone, E: Clone>(shared: Shared<V, E>) -> Result<V, E> {
    match shared.as_ref() {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(e.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_identical_calls_invoke_fn_once() {
        let dedup = Arc::new(Deduplicator::<String, String>::new());
        let call_count = Arc::new(AtomicUsize::new(0));

        let start = tokio::time::Instant::now();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedup = dedup.clone();
            let call_count = call_count.clone();
            handles.push(tokio::spawn(async move {
                dedup
                    .do_call("k", || {
                        let call_count = call_count.clone();
                        async move {
                            call_count.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Ok::<_, String>("v".to_string())
                        }
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), Ok("v".to_string()));
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < std::time::Duration::from_millis(300));
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let dedup = Deduplicator::<String, String>::new();
        let a = dedup.do_call("a", || async { Ok::<_, String>("a-value".to_string()) });
        let b = dedup.do_call("b", || async { Ok::<_, String>("b-value".to_string()) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, Ok("a-value".to_string()));
        assert_eq!(b, Ok("b-value".to_string()));
    }

    #[tokio::test]
    async fn in_flight_record_removed_after_completion() {
        let dedup = Deduplicator::<String, String>::new();
        dedup
            .do_call("k", || async { Ok::<_, String>("v".to_string()) })
            .await
            .unwrap();
        assert!(dedup.inflight.lock().is_empty());
    }
}
