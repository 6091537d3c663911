use crate::core::error::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire name of the gauge kind
pub const GAUGE: &str = "gauge";
/// Wire name of the counter kind
pub const COUNTER: &str = "counter";

/// Kind of a metric.
///
/// Unknown kinds survive decoding so that storage can reject them with
/// [`MetricsError::NotImplemented`] instead of failing at the JSON layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricKind {
    /// Last write wins
    Gauge,
    /// Running sum of deltas
    Counter,
    /// Anything else a client sent
    Unknown(String),
}

impl MetricKind {
    /// Returns the wire name of the kind
    pub fn as_str(&self) -> &str {
        match self {
            MetricKind::Gauge => GAUGE,
            MetricKind::Counter => COUNTER,
            MetricKind::Unknown(other) => other,
        }
    }

    /// Returns true for gauge and counter
    pub fn is_known(&self) -> bool {
        !matches!(self, MetricKind::Unknown(_))
    }
}

impl From<String> for MetricKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            GAUGE => MetricKind::Gauge,
            COUNTER => MetricKind::Counter,
            _ => MetricKind::Unknown(value),
        }
    }
}

impl From<&str> for MetricKind {
    fn from(value: &str) -> Self {
        MetricKind::from(value.to_string())
    }
}

impl From<MetricKind> for String {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single metric as it travels between agent, server and storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Stable metric name
    pub id: String,
    /// Metric kind, `type` on the wire
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Counter increment (write) or running sum (read)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Hex HMAC-SHA-256 over the canonical form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Metric {
    /// Creates a gauge metric
    pub fn gauge<S: Into<String>>(id: S, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
            hash: None,
        }
    }

    /// Creates a counter metric
    pub fn counter<S: Into<String>>(id: S, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
            hash: None,
        }
    }

    /// Creates a lookup query carrying only id and kind
    pub fn query<S: Into<String>, K: Into<MetricKind>>(id: S, kind: K) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            delta: None,
            value: None,
            hash: None,
        }
    }

    /// Returns the signature, treating an empty string as absent
    pub fn signature(&self) -> Option<&str> {
        self.hash.as_deref().filter(|h| !h.is_empty())
    }

    /// Checks kind and the presence of the field the kind requires.
    ///
    /// Unknown kinds are NotImplemented, a missing value or delta is BadRequest.
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            MetricKind::Gauge if self.value.is_none() => Err(MetricsError::bad_request(format!(
                "no value in update request for gauge '{}'",
                self.id
            ))),
            MetricKind::Counter if self.delta.is_none() => Err(MetricsError::bad_request(
                format!("no delta in update request for counter '{}'", self.id),
            )),
            MetricKind::Unknown(kind) => Err(MetricsError::not_implemented(format!(
                "no such type of metric: {}",
                kind
            ))),
            _ => Ok(()),
        }
    }

    /// Canonical string covered by the signature.
    ///
    /// Gauges use six fractional digits, counters the plain integer.
    pub fn canonical(&self) -> Result<String> {
        match (&self.kind, self.value, self.delta) {
            (MetricKind::Gauge, Some(value), _) => Ok(format!("{}:gauge:{:.6}", self.id, value)),
            (MetricKind::Counter, _, Some(delta)) => Ok(format!("{}:counter:{}", self.id, delta)),
            _ => {
                self.validate()?;
                Err(MetricsError::bad_request(format!("metric '{}' has no canonical form", self.id)))
            },
        }
    }

    /// Storage key for hash-per-metric backends
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Renders the stored value as plain text
    pub fn value_text(&self) -> Option<String> {
        match self.kind {
            MetricKind::Gauge => self.value.map(|v| v.to_string()),
            MetricKind::Counter => self.delta.map(|d| d.to_string()),
            MetricKind::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_text() {
            Some(text) => write!(f, "{}: {}", self.id, text),
            None => write!(f, "{}: <empty>", self.id),
        }
    }
}
