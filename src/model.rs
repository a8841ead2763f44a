use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ─── Identity ────────────────────────────────────────────────────

/// The two update semantics a metric can have.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative: every update adds its delta.
    Counter,
    /// Overwriting: every update replaces the value.
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            other => Err(WireError::UnknownKind(other.to_owned())),
        }
    }
}

/// `(name, kind)` addresses exactly one record. Two kinds may share a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricId {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// ─── Values ──────────────────────────────────────────────────────

/// Current value of a metric. The variant fixes the kind for the record's
/// whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Sum of every delta ever applied; wraps on i64 overflow.
    Counter(i64),
    /// Last written value, finite or not.
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(v) => write!(f, "{v}"),
            Self::Gauge(v) => write!(f, "{v}"),
        }
    }
}

/// A named, typed value as seen by callers. Always an owned copy; mutating
/// it never touches store state.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: MetricValue,
}

impl MetricRecord {
    pub fn counter(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(value),
        }
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn id(&self) -> MetricId {
        MetricId::new(self.name.clone(), self.kind())
    }
}

/// A consistent point-in-time copy of a whole table.
pub type Snapshot = BTreeMap<MetricId, MetricRecord>;

// ─── Wire / durable representation ───────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("unsupported metric type '{0}'")]
    UnknownKind(String),

    #[error("metric '{id}' of type {kind} carries no value")]
    MissingValue { id: String, kind: MetricKind },

    #[error("metric name must not be empty")]
    EmptyName,
}

/// JSON shape shared by the HTTP API, the agent batches and the snapshot
/// file: `{"id": "...", "type": "counter", "delta": 1}`.
///
/// `type` stays a plain string so an unknown kind can be told apart from
/// a malformed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "float_repr::serialize",
        deserialize_with = "float_repr::deserialize"
    )]
    pub value: Option<f64>,
}

impl Metrics {
    /// Parses the kind and the non-empty name, leaving the value alone.
    /// Used by lookups, which carry no value.
    pub fn identity(&self) -> Result<MetricId, WireError> {
        if self.id.is_empty() {
            return Err(WireError::EmptyName);
        }
        Ok(MetricId::new(self.id.clone(), self.mtype.parse()?))
    }
}

impl From<&MetricRecord> for Metrics {
    fn from(record: &MetricRecord) -> Self {
        let (delta, value) = match record.value {
            MetricValue::Counter(d) => (Some(d), None),
            MetricValue::Gauge(v) => (None, Some(v)),
        };
        Self {
            id: record.name.clone(),
            mtype: record.kind().as_str().to_owned(),
            delta,
            value,
        }
    }
}

impl TryFrom<Metrics> for MetricRecord {
    type Error = WireError;

    fn try_from(m: Metrics) -> Result<Self, Self::Error> {
        let MetricId { name, kind } = m.identity()?;
        let value = match kind {
            MetricKind::Counter => m.delta.map(MetricValue::Counter),
            MetricKind::Gauge => m.value.map(MetricValue::Gauge),
        };
        match value {
            Some(value) => Ok(Self { name, value }),
            None => Err(WireError::MissingValue { id: name, kind }),
        }
    }
}

/// JSON has no NaN or infinity. Non-finite gauges travel as the strings
/// Rust's `Display` produces ("NaN", "inf", "-inf").
mod float_repr {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(f) if f.is_finite() => s.serialize_f64(*f),
            Some(f) => s.serialize_str(&f.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(d)? {
            None => Ok(None),
            Some(Repr::Number(f)) => Ok(Some(f)),
            Some(Repr::Text(t)) => t
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid float '{t}'"))),
        }
    }
}
