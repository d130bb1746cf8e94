//! Core data types for the ingestion pipeline
//!
//! This module defines the values that flow through one ingestion call:
//! - `Label`: a single name/value pair
//! - `TimeSeries`: raw input, labels plus samples
//! - `LabelSet`: the normalized, ordered label set of one series
//! - `SampleRow`: a sample bound to its resolved series ID
//! - `MetricTable`: the storage partition for one metric name

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the label that carries the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Identity assigned to a distinct label by the backend
pub type LabelId = i64;

/// Identity assigned to a distinct series by the backend
pub type SeriesId = i64;

/// Identity assigned to a metric table by the backend
pub type MetricTableId = i64;

/// 64-bit content hash of a label set
pub type Fingerprint = u64;

/// Separator between names and values while fingerprinting.
/// 0xff never appears in valid UTF-8.
const FINGERPRINT_SEPARATOR: u8 = 0xff;

/// An immutable name/value pair attached to a time series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Shorthand for the `__name__` label
    pub fn metric_name(value: impl Into<String>) -> Self {
        Self::new(METRIC_NAME_LABEL, value)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

/// A single timestamped value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Create a sample stamped with the current time
    pub fn now(value: f64) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            value,
        }
    }
}

/// One element of an ingestion batch: labels as received plus samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a label
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Label::new(name, value));
        self
    }

    /// Builder method: add a sample
    pub fn sample(mut self, timestamp: i64, value: f64) -> Self {
        self.samples.push(Sample::new(timestamp, value));
        self
    }
}

/// Normalized label set of one series
///
/// Labels are ordered by name and each name appears once. The order is
/// what makes the fingerprint and the resolved label-ID list independent
/// of the order labels arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelSet {
    labels: Vec<Label>,
    fingerprint: Fingerprint,
}

impl LabelSet {
    /// Normalize a raw label list
    ///
    /// Duplicate names keep the last value given. Labels with an empty
    /// value are treated as absent and dropped.
    pub fn from_labels(raw: &[Label]) -> Self {
        let mut by_name: BTreeMap<&str, &str> = BTreeMap::new();
        for label in raw {
            by_name.insert(&label.name, &label.value);
        }

        let labels: Vec<Label> = by_name
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| Label::new(name, value))
            .collect();
        let fingerprint = fingerprint(&labels);

        Self {
            labels,
            fingerprint,
        }
    }

    /// Value of the `__name__` label, if present
    pub fn metric_name(&self) -> Option<&str> {
        self.labels
            .binary_search_by(|l| l.name.as_str().cmp(METRIC_NAME_LABEL))
            .ok()
            .map(|idx| self.labels[idx].value.as_str())
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Labels ordered by name
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (idx, label) in self.labels.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", label)?;
        }
        write!(f, "}}")
    }
}

/// Hash an ordered label list with seahash
fn fingerprint(labels: &[Label]) -> Fingerprint {
    let size: usize = labels
        .iter()
        .map(|l| l.name.len() + l.value.len() + 2)
        .sum();
    let mut buf = Vec::with_capacity(size);
    for label in labels {
        buf.extend_from_slice(label.name.as_bytes());
        buf.push(FINGERPRINT_SEPARATOR);
        buf.extend_from_slice(label.value.as_bytes());
        buf.push(FINGERPRINT_SEPARATOR);
    }
    seahash::hash(&buf)
}

/// A sample bound to its resolved series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRow {
    pub series_id: SeriesId,
    pub timestamp: i64,
    pub value: f64,
}

impl SampleRow {
    pub fn new(series_id: SeriesId, sample: &Sample) -> Self {
        Self {
            series_id,
            timestamp: sample.timestamp,
            value: sample.value,
        }
    }
}

/// Storage partition for one metric name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricTable {
    pub id: MetricTableId,
    /// Physical identifier; equals the metric name unless it had to be
    /// truncated or disambiguated
    pub table_name: String,
}
