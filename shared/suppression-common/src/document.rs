use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A source document matched by the rule query.
///
/// `fields` maps a field path to its value. Paths may be stored flat
/// (`"host.name"`) or as nested objects (`{"host": {"name": ..}}`); both are
/// resolved by [`MatchedDocument::field`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedDocument {
    pub id: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl MatchedDocument {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.fields.insert(path.into(), value);
        self
    }

    /// Resolves a dotted field path. A flat key wins over a nested lookup.
    pub fn field(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.fields.get(path) {
            return Some(value);
        }

        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// The timestamp used for suppression windows.
    ///
    /// When `timestamp_override` names a field holding an RFC 3339 string,
    /// that value is used; otherwise the raw event timestamp.
    pub fn suppression_timestamp(&self, timestamp_override: Option<&str>) -> DateTime<Utc> {
        timestamp_override
            .and_then(|field| self.field(field))
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(self.timestamp)
    }
}

/// Inclusive time range bounding one evaluation cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from <= ts && ts <= self.to
    }
}
