//! Series Data Model
//!
//! Labels, label sets and samples as they move through the pipeline:
//!
//! ```text
//! TimeSeries (raw labels + samples)
//!        ↓ normalize
//! LabelSet (ordered, deduplicated, fingerprinted)
//!        ↓ resolve
//! SampleRow (series_id, timestamp, value)
//! ```

pub mod types;

pub use types::{
    Fingerprint, Label, LabelId, LabelSet, MetricTable, MetricTableId, Sample, SampleRow,
    SeriesId, TimeSeries, METRIC_NAME_LABEL,
};
