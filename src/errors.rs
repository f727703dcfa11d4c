//! Crate-wide error types.
//!
//! Each subsystem gets its own error enum (mirroring how the enterprise
//! modules this crate grew out of scope their errors per-domain rather than
//! sharing one god-enum), and `CoreError` aggregates them for call sites that
//! cross subsystem boundaries (e.g. the HTTP management API).

use thiserror::Error;

/// Errors from the cache subsystem (C1-C8).
///
/// Per spec, the LRU/TTL store (C1) and deduplicator (C6) are infallible;
/// this enum only covers the tiers that touch the network (Redis) or a
/// backing store.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The Redis connection could not be reached within the configured
    /// deadline. The hybrid cache degrades to L1-only on this error.
    #[error("redis unreachable: {0}")]
    RedisUnreachable(String),

    /// A Redis operation exceeded its deadline.
    #[error("redis operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The operation was cancelled via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from the metrics persistence subsystem (C13).
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The underlying database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller-supplied context timed out or was cancelled.
    #[error("query cancelled or timed out")]
    Cancelled,
}

/// Result alias for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors surfaced by the audit ring (C11), e.g. on export.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Serialization of the exported entries failed.
    #[error("export serialization failed: {0}")]
    Export(#[from] serde_json::Error),
}

/// Result alias for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

/// Aggregate error type for call sites spanning multiple subsystems
/// (primarily the HTTP management API in `api`).
#[derive(Error, Debug)]
pub enum CoreError {
    /// A cache-tier failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A persistence-layer failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// An audit-subsystem failure.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The request's query parameters failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result alias for crate-level operations.
pub type CoreResult<T> = Result<T, CoreError>;
