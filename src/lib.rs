//! # llm-proxy-core
//!
//! Core building blocks for an LLM-provider reverse proxy: multi-tier
//! response caching, real-time and historical metrics, audit logging,
//! provider error classification and retry policy, and context-window
//! management.
//!
//! ## Modules
//!
//! - `cache`: multi-tier (in-memory LRU + optional Redis) response cache,
//!   semantic and streaming-event variants, single-flight deduplication.
//! - `metrics`: real-time counters/percentiles, rolling historical windows,
//!   a WebSocket fan-out hub, and optional Postgres-backed persistence.
//! - `audit`: a bounded ring buffer of per-request audit entries.
//! - `provider`: upstream error classification, retry/backoff policy, and
//!   the credential pool seam those decisions drive.
//! - `context`: context-window truncation strategies.
//! - `api`: the HTTP + WebSocket management surface.
//! - `config`: configuration structs for every subsystem above.
//! - `errors`: shared error types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod metrics;
pub mod provider;

/// Crate version, as set in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, as set in `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
