//! Storage contract shared by every backend.

use crate::core::{signing, Metric, MetricKind, MetricsError, Result};

/// Persistence contract for metrics.
///
/// Gauges are last-write-wins; counters accumulate the written deltas.
/// Implementations serialize counter updates per id internally.
#[async_trait::async_trait]
pub trait MetricStorage: Send + Sync {
    /// Verify and upsert one metric.
    async fn save_metric(&self, metric: Metric, key: &str) -> Result<()>;

    /// Save metrics in order. The first error aborts; earlier writes stay applied.
    async fn save_many_metrics(&self, metrics: Vec<Metric>, key: &str) -> Result<()> {
        for metric in metrics {
            self.save_metric(metric, key).await?;
        }
        Ok(())
    }

    /// Look up the metric named by `query.id` and `query.kind`.
    ///
    /// The returned metric carries a fresh signature when `key` is non-empty.
    async fn get_metric(&self, query: Metric, key: &str) -> Result<Metric>;

    /// Dump every stored metric, in no particular order.
    async fn get_all_metrics(&self) -> Result<Vec<Metric>>;

    /// Health probe.
    async fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Rejects a write before it touches any backend state.
pub(crate) fn admit(metric: &Metric, key: &str) -> Result<()> {
    metric.validate()?;
    signing::verify(metric, key)
}

/// Rejects lookups of kinds nothing can be stored under.
pub(crate) fn admit_query(query: &Metric) -> Result<()> {
    match &query.kind {
        MetricKind::Unknown(kind) => {
            Err(MetricsError::not_found(format!("no metric '{}' of type '{}'", query.id, kind)))
        },
        _ => Ok(()),
    }
}

/// Signs a metric on its way out of storage.
pub(crate) fn seal(mut metric: Metric, key: &str) -> Result<Metric> {
    signing::attach(&mut metric, key)?;
    Ok(metric)
}

pub(crate) fn missing(query: &Metric) -> MetricsError {
    MetricsError::not_found(format!("no {} '{}'", query.kind, query.id))
}
