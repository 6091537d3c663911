//! Relational storage on SQLite.
//!
//! One row per `(id, type)`. Both upserts are single statements, so the
//! database serializes concurrent counter writes for the same id.

use super::backend::{admit, admit_query, missing, seal, MetricStorage};
use crate::core::{Metric, MetricKind, MetricsError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, instrument};

const UPSERT_GAUGE: &str = r#"
    INSERT INTO metrics (id, type, value, delta)
    VALUES (?, 'gauge', ?, NULL)
    ON CONFLICT (id, type) DO UPDATE SET value = excluded.value
"#;

// SQLite silently turns an overflowing integer sum into REAL, so the update is
// guarded on the operands and skipped when the sum would leave the i64 range.
const UPSERT_COUNTER: &str = r#"
    INSERT INTO metrics (id, type, value, delta)
    VALUES (?, 'counter', NULL, ?)
    ON CONFLICT (id, type) DO UPDATE SET delta = COALESCE(metrics.delta, 0) + excluded.delta
    WHERE (excluded.delta >= 0 AND COALESCE(metrics.delta, 0) <= 9223372036854775807 - excluded.delta)
       OR (excluded.delta < 0 AND COALESCE(metrics.delta, 0) >= (-9223372036854775807 - 1) - excluded.delta)
"#;

/// SQLite-backed storage.
#[derive(Clone)]
pub struct RelationalStorage {
    pool: SqlitePool,
}

impl RelationalStorage {
    /// Connect to `dsn` and create the schema.
    ///
    /// Accepts `sqlite://path`, `sqlite::memory:` and bare file paths.
    /// In-memory databases are pinned to a single connection since each
    /// connection would otherwise see its own database.
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        if let Some((scheme, _)) = dsn.split_once("://") {
            if scheme != "sqlite" {
                return Err(MetricsError::config(format!("unsupported database scheme '{}'", scheme)));
            }
        }
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| MetricsError::config(format!("invalid database DSN: {}", e)))?
            .create_if_missing(true);

        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let storage = Self { pool };
        storage.migrate().await?;
        info!("Relational storage ready");
        Ok(storage)
    }

    /// Connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id    TEXT    NOT NULL,
                type  TEXT    NOT NULL,
                value REAL,
                delta INTEGER,
                PRIMARY KEY (id, type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        debug!("metrics table present");
        Ok(())
    }
}

fn row_to_metric(row: &SqliteRow) -> Result<Metric> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("type")?;
    let metric = match MetricKind::from(kind) {
        MetricKind::Gauge => {
            Metric::gauge(id, row.try_get::<Option<f64>, _>("value")?.unwrap_or_default())
        },
        MetricKind::Counter => {
            Metric::counter(id, row.try_get::<Option<i64>, _>("delta")?.unwrap_or_default())
        },
        MetricKind::Unknown(kind) => {
            return Err(MetricsError::storage(format!("row '{}' has unknown type '{}'", id, kind)))
        },
    };
    Ok(metric)
}

#[async_trait::async_trait]
impl MetricStorage for RelationalStorage {
    #[instrument(skip(self, metric, key), fields(id = %metric.id, kind = %metric.kind))]
    async fn save_metric(&self, metric: Metric, key: &str) -> Result<()> {
        admit(&metric, key)?;
        match (&metric.kind, metric.value, metric.delta) {
            (MetricKind::Gauge, Some(value), _) => {
                sqlx::query(UPSERT_GAUGE).bind(&metric.id).bind(value).execute(&self.pool).await?;
            },
            (MetricKind::Counter, _, Some(delta)) => {
                let done = sqlx::query(UPSERT_COUNTER).bind(&metric.id).bind(delta).execute(&self.pool).await?;
                if done.rows_affected() == 0 {
                    return Err(MetricsError::bad_request(format!(
                        "counter '{}' would overflow",
                        metric.id
                    )));
                }
            },
            _ => metric.validate()?,
        }
        Ok(())
    }

    async fn get_metric(&self, query: Metric, key: &str) -> Result<Metric> {
        admit_query(&query)?;
        let row = sqlx::query("SELECT id, type, value, delta FROM metrics WHERE id = ? AND type = ?")
            .bind(&query.id)
            .bind(query.kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => seal(row_to_metric(&row)?, key),
            None => Err(missing(&query)),
        }
    }

    async fn get_all_metrics(&self) -> Result<Vec<Metric>> {
        let rows = sqlx::query("SELECT id, type, value, delta FROM metrics")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }
}
