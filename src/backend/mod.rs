//! Storage Backend
//!
//! The backend owns durable identity. Every get-or-create primitive is
//! idempotent: concurrent callers asking for the same content converge on
//! one ID, whichever of them created it.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    SqliteBackend                     │
//! │  ┌───────────┐  ┌───────────┐  ┌──────────────────┐  │
//! │  │   label   │  │  series   │  │      metric      │  │
//! │  │ (name,    │  │ (metric,  │  │ (metric_name,    │  │
//! │  │  value)   │  │  labels)  │  │  table_name)     │  │
//! │  └───────────┘  └───────────┘  └────────┬─────────┘  │
//! │                                         │            │
//! │                         ┌───────────────▼────────┐   │
//! │                         │ data_<table_name> rows │   │
//! │                         └────────────────────────┘   │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod naming;
pub mod pool;
pub mod schema;
pub mod sqlite;

pub use error::{BackendError, BackendResult, SchemaError};
pub use naming::{allocate_table_name, MAX_TABLE_NAME_LEN};
pub use pool::ConnectionPool;
pub use schema::{SchemaState, DEFAULT_CHUNK_INTERVAL_MS, SCHEMA_VERSION};
pub use sqlite::{CatalogStats, MetricInfo, SqliteBackend};

use crate::series::{Label, LabelId, MetricTable, SampleRow, SeriesId};
use async_trait::async_trait;

/// Idempotent identity primitives plus a bulk row append
#[async_trait]
pub trait Backend: Send + Sync {
    /// Return the table for `metric_name`, creating it on first use
    async fn get_or_create_metric_table(&self, metric_name: &str) -> BackendResult<MetricTable>;

    /// Return the ID of `label`, creating it on first use
    async fn get_or_create_label_id(&self, label: &Label) -> BackendResult<LabelId>;

    /// Return the ID of the series made of `label_ids` under `metric_name`
    ///
    /// `label_ids` must be ordered by label name.
    async fn get_or_create_series_id(
        &self,
        metric_name: &str,
        label_ids: &[LabelId],
    ) -> BackendResult<SeriesId>;

    /// Append rows to `table`, returning how many were accepted
    async fn insert_rows(&self, table: &MetricTable, rows: &[SampleRow]) -> BackendResult<u64>;

    /// Resolve many labels in one round trip
    ///
    /// IDs are returned in input order.
    async fn get_or_create_label_ids(&self, labels: &[Label]) -> BackendResult<Vec<LabelId>> {
        let mut ids = Vec::with_capacity(labels.len());
        for label in labels {
            ids.push(self.get_or_create_label_id(label).await?);
        }
        Ok(ids)
    }

    /// Resolve many series in one round trip
    ///
    /// Each entry is a metric name and its ordered label IDs. IDs are
    /// returned in input order.
    async fn get_or_create_series_ids(
        &self,
        series: &[(String, Vec<LabelId>)],
    ) -> BackendResult<Vec<SeriesId>> {
        let mut ids = Vec::with_capacity(series.len());
        for (metric_name, label_ids) in series {
            ids.push(self.get_or_create_series_id(metric_name, label_ids).await?);
        }
        Ok(ids)
    }
}
