//! Time-series persistence (C13): durable snapshots and rolling aggregates
//! backed by Postgres via `sqlx`.
//!
//! Writes are batched and flushed on a fixed interval rather than per
//! request (spec §4.13) — the hot request path only ever pushes into an
//! in-memory queue. Hourly/daily aggregates use an exponentially-weighted
//! latency blend so a single noisy request can't swing the running average.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::config::MetricsDbConfig;
use crate::errors::PersistenceResult;

/// One recorded upstream request, queued for the next flush.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    /// When the request completed.
    pub recorded_at: DateTime<Utc>,
    /// Model identifier.
    pub model: String,
    /// Upstream provider name.
    pub provider: String,
    /// Total tokens (input + output).
    pub tokens: i64,
    /// Prompt/input token count.
    pub input_tokens: i64,
    /// Completion/output token count.
    pub output_tokens: i64,
    /// Request latency in milliseconds.
    pub latency_ms: i64,
    /// Whether the request succeeded.
    pub success: bool,
}

/// Latency/throughput point returned by the TPS/TPM/TPH/TPD read queries
/// (spec §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThroughputPoint {
    /// Start of this bucket's time window.
    pub bucket_start: DateTime<Utc>,
    /// Requests observed in this bucket.
    pub requests: i64,
    /// Tokens observed in this bucket.
    pub tokens: i64,
    /// Mean latency in this bucket.
    pub avg_latency_ms: f64,
}

/// Exponentially-weighted blend of a running average with a new sample
/// (spec §4.13: new_avg = 0.9 * old + 0.1 * delta).
fn blend_latency(old_avg: f64, sample: f64) -> f64 {
    0.9 * old_avg + 0.1 * sample
}

/// Durable store for metrics snapshots and hourly/daily aggregates.
pub struct MetricsStore {
    pool: PgPool,
    queue: Mutex<Vec<SnapshotRecord>>,
    batch_size: usize,
    retention_days: i64,
}

impl MetricsStore {
    /// Connect and run embedded migrations (spec §4.13 schema setup).
    pub async fn connect(database_url: &str, config: &MetricsDbConfig) -> PersistenceResult<Arc<Self>> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_snapshots (
                id BIGSERIAL PRIMARY KEY,
                recorded_at TIMESTAMPTZ NOT NULL,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                tokens BIGINT NOT NULL,
                input_tokens BIGINT NOT NULL,
                output_tokens BIGINT NOT NULL,
                latency_ms BIGINT NOT NULL,
                success BOOLEAN NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_metrics (
                model TEXT PRIMARY KEY,
                total_requests BIGINT NOT NULL DEFAULT 0,
                total_tokens BIGINT NOT NULL DEFAULT 0,
                avg_latency_ms DOUBLE PRECISION NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hourly_aggregates (
                bucket_start TIMESTAMPTZ PRIMARY KEY,
                requests BIGINT NOT NULL DEFAULT 0,
                tokens BIGINT NOT NULL DEFAULT 0,
                avg_latency_ms DOUBLE PRECISION NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_aggregates (
                bucket_start TIMESTAMPTZ PRIMARY KEY,
                requests BIGINT NOT NULL DEFAULT 0,
                tokens BIGINT NOT NULL DEFAULT 0,
                avg_latency_ms DOUBLE PRECISION NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Arc::new(Self {
            pool,
            queue: Mutex::new(Vec::new()),
            batch_size: config.batch_size,
            retention_days: config.retention_days as i64,
        }))
    }

    /// Enqueue a completed request; flushes immediately if the queue has
    /// reached `batch_size` (spec §4.13).
    pub async fn record(&self, record: SnapshotRecord) -> PersistenceResult<()> {
        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.push(record);
            queue.len() >= self.batch_size
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the queue: bulk-insert snapshots, then fold each into its
    /// model/hourly/daily aggregate.
    pub async fn flush(&self) -> PersistenceResult<()> {
        let batch = {
            let mut queue = self.queue.lock().await;
            std::mem::take(&mut *queue)
        };
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in &batch {
            sqlx::query(
                r#"
                INSERT INTO metrics_snapshots
                    (recorded_at, model, provider, tokens, input_tokens, output_tokens, latency_ms, success)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.recorded_at)
            .bind(&record.model)
            .bind(&record.provider)
            .bind(record.tokens)
            .bind(record.input_tokens)
            .bind(record.output_tokens)
            .bind(record.latency_ms)
            .bind(record.success)
            .execute(&mut *tx)
            .await?;

            upsert_model(&mut tx, record).await?;
            upsert_bucket(&mut tx, "hourly_aggregates", truncate_hour(record.recorded_at), record).await?;
            upsert_bucket(&mut tx, "daily_aggregates", truncate_day(record.recorded_at), record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete snapshot rows older than the configured retention window
    /// (spec §4.13 retention sweep).
    pub async fn sweep_retention(&self) -> PersistenceResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);
        let result = sqlx::query("DELETE FROM metrics_snapshots WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Tokens-per-second: snapshot rows from the last 60 seconds, grouped
    /// per second.
    pub async fn tps(&self) -> PersistenceResult<Vec<ThroughputPoint>> {
        self.throughput_query("second", 60).await
    }

    /// Tokens-per-minute: last 60 minutes.
    pub async fn tpm(&self) -> PersistenceResult<Vec<ThroughputPoint>> {
        self.throughput_query("minute", 60).await
    }

    /// Tokens-per-hour: last 24 hours, read from the hourly aggregate table.
    pub async fn tph(&self) -> PersistenceResult<Vec<ThroughputPoint>> {
        self.bucketed_query("hourly_aggregates", 24).await
    }

    /// Tokens-per-day: last 30 days, read from the daily aggregate table.
    pub async fn tpd(&self) -> PersistenceResult<Vec<ThroughputPoint>> {
        self.bucketed_query("daily_aggregates", 30).await
    }

    async fn throughput_query(&self, truncate_to: &str, limit: i64) -> PersistenceResult<Vec<ThroughputPoint>> {
        let query = format!(
            r#"
            SELECT date_trunc('{truncate_to}', recorded_at) AS bucket_start,
                   COUNT(*) AS requests,
                   COALESCE(SUM(tokens), 0) AS tokens,
                   COALESCE(AVG(latency_ms), 0) AS avg_latency_ms
            FROM metrics_snapshots
            GROUP BY bucket_start
            ORDER BY bucket_start DESC
            LIMIT $1
            "#
        );
        let rows = sqlx::query_as::<_, (DateTime<Utc>, i64, i64, f64)>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(bucket_start, requests, tokens, avg_latency_ms)| ThroughputPoint {
                bucket_start,
                requests,
                tokens,
                avg_latency_ms,
            })
            .collect())
    }

    async fn bucketed_query(&self, table: &str, limit: i64) -> PersistenceResult<Vec<ThroughputPoint>> {
        let query = format!(
            "SELECT bucket_start, requests, tokens, avg_latency_ms FROM {table} ORDER BY bucket_start DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, (DateTime<Utc>, i64, i64, f64)>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(bucket_start, requests, tokens, avg_latency_ms)| ThroughputPoint {
                bucket_start,
                requests,
                tokens,
                avg_latency_ms,
            })
            .collect())
    }
}

fn truncate_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::Timelike;
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

fn truncate_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_hms_opt(0, 0, 0).expect("midnight is always valid").and_utc()
}

async fn upsert_model(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, record: &SnapshotRecord) -> Result<(), sqlx::Error> {
    let existing: Option<(i64, f64)> = sqlx::query_as("SELECT total_requests, avg_latency_ms FROM model_metrics WHERE model = $1")
        .bind(&record.model)
        .fetch_optional(&mut **tx)
        .await?;

    let new_avg = match existing {
        Some((_, old_avg)) => blend_latency(old_avg, record.latency_ms as f64),
        None => record.latency_ms as f64,
    };

    sqlx::query(
        r#"
        INSERT INTO model_metrics (model, total_requests, total_tokens, avg_latency_ms)
        VALUES ($1, 1, $2, $3)
        ON CONFLICT (model) DO UPDATE SET
            total_requests = model_metrics.total_requests + 1,
            total_tokens = model_metrics.total_tokens + EXCLUDED.total_tokens,
            avg_latency_ms = $3
        "#,
    )
    .bind(&record.model)
    .bind(record.tokens)
    .bind(new_avg)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_bucket(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    table: &str,
    bucket_start: DateTime<Utc>,
    record: &SnapshotRecord,
) -> Result<(), sqlx::Error> {
    let existing: Option<(i64, f64)> = sqlx::query_as(&format!(
        "SELECT requests, avg_latency_ms FROM {table} WHERE bucket_start = $1"
    ))
    .bind(bucket_start)
    .fetch_optional(&mut **tx)
    .await?;

    let new_avg = match existing {
        Some((_, old_avg)) => blend_latency(old_avg, record.latency_ms as f64),
        None => record.latency_ms as f64,
    };

    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (bucket_start, requests, tokens, avg_latency_ms)
        VALUES ($1, 1, $2, $3)
        ON CONFLICT (bucket_start) DO UPDATE SET
            requests = {table}.requests + 1,
            tokens = {table}.tokens + EXCLUDED.tokens,
            avg_latency_ms = $3
        "#
    ))
    .bind(bucket_start)
    .bind(record.tokens)
    .bind(new_avg)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Spawn the periodic flush + retention sweep loop (spec §4.13).
pub fn spawn_flusher(store: Arc<MetricsStore>, flush_interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = store.flush().await {
                tracing::error!(%err, "metrics flush failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_blend_weights_old_average_more_heavily() {
        let blended = blend_latency(100.0, 200.0);
        assert_eq!(blended, 110.0);
    }

    #[test]
    fn latency_blend_converges_toward_repeated_sample() {
        let mut avg = 100.0;
        for _ in 0..50 {
            avg = blend_latency(avg, 50.0);
        }
        assert!((avg - 50.0).abs() < 1.0);
    }
}
