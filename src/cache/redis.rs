//! Redis adapter (C2): a uniform Get/Set/Del/TTL/Keys/Ping surface over a
//! pooled remote store.
//!
//! The adapter classifies failures only as "reachable" vs "not reachable"
//! (spec §4.2) and never retries internally; the caller (the hybrid cache or
//! the facade) decides what to do about a failure. Every operation accepts a
//! deadline and is cancellation-aware via `tokio::time::timeout`.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisConfig;
use crate::errors::{CacheError, CacheResult};

/// A connected Redis adapter. Constructed once at startup by the cache
/// facade (C8); cheap to clone (the connection manager multiplexes
/// internally).
#[derive(Clone)]
pub struct RedisAdapter {
    conn: ConnectionManager,
    key_prefix: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisAdapter {
    /// Dial Redis within `dial_timeout`. Returns `Err` if the ping fails or
    /// the dial itself times out; the facade treats this as "continue
    /// without Redis" per spec §4.8, it does not fail startup.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let url = Self::build_url(config);
        let dial = async {
            let client = redis::Client::open(url)
                .map_err(|e| CacheError::RedisUnreachable(e.to_string()))?;
            ConnectionManager::new(client)
                .await
                .map_err(|e| CacheError::RedisUnreachable(e.to_string()))
        };
        let conn = tokio::time::timeout(Duration::from_millis(config.dial_timeout_ms), dial)
            .await
            .map_err(|_| CacheError::Timeout(Duration::from_millis(config.dial_timeout_ms)))??;

        let adapter = Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        };
        adapter.ping().await?;
        Ok(adapter)
    }

    fn build_url(config: &RedisConfig) -> String {
        let scheme = if config.enable_tls { "rediss" } else { "redis" };
        match &config.password {
            Some(pw) => format!("{scheme}://:{pw}@{}/{}", config.address, config.database),
            None => format!("{scheme}://{}/{}", config.address, config.database),
        }
    }

    /// `Ping` within the read deadline.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        let fut = cmd.query_async::<_, String>(&mut conn);
        tokio::time::timeout(self.read_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.read_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))?;
        Ok(())
    }

    /// `Get` a key within the read deadline. A missing key is `Ok(None)`,
    /// not an error.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let fut = conn.get::<_, Option<Vec<u8>>>(key);
        tokio::time::timeout(self.read_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.read_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))
    }

    /// `Set` a key with TTL within the write deadline.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let fut = conn.set_ex::<_, _, ()>(key, value, secs);
        tokio::time::timeout(self.write_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.write_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))
    }

    /// `Delete` a key within the write deadline.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let fut = conn.del::<_, ()>(key);
        tokio::time::timeout(self.write_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.write_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))
    }

    /// Whether a key exists.
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let fut = conn.exists::<_, bool>(key);
        tokio::time::timeout(self.read_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.read_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))
    }

    /// Remaining TTL for a key, if any.
    pub async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let fut = conn.ttl::<_, i64>(key);
        let secs = tokio::time::timeout(self.read_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.read_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))?;
        Ok(if secs > 0 {
            Some(Duration::from_secs(secs as u64))
        } else {
            None
        })
    }

    /// Keys matching a glob pattern.
    pub async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let fut = conn.keys::<_, Vec<String>>(pattern);
        tokio::time::timeout(self.read_timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.read_timeout))?
            .map_err(|e| CacheError::RedisUnreachable(e.to_string()))
    }

    /// The configured key prefix, used by the hybrid cache to namespace L2
    /// keys as `<prefix>:<model>:<hash(key)>` (spec §4.3).
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Close the adapter. `ConnectionManager` has no explicit close; this is
    /// a no-op kept to complete the C2 operation surface from spec §4.2.
    pub async fn close(&self) {}
}
