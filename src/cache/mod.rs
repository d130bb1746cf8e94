//! Identity Cache
//!
//! Process-local mapping from label content to label ID, from series
//! fingerprint to series ID, and from metric name to metric table. Shared
//! by every concurrent ingestion call.
//!
//! A miss is not an error: it means the identity has to be resolved
//! through the backend. Entries are never evicted.

mod memory;

pub use memory::MemoryCache;

use crate::series::{Fingerprint, Label, LabelId, MetricTable, SeriesId};
use thiserror::Error;

/// Errors raised while writing to the cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// A writer panicked while holding the lock for this map
    #[error("Cache lock poisoned: {0}")]
    Poisoned(&'static str),

    /// Write refused by the cache implementation
    #[error("Cache write failed: {0}")]
    WriteFailed(String),
}

/// Number of entries held per map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub labels: usize,
    pub series: usize,
    pub metric_tables: usize,
}

/// Concurrency-safe identity lookups
pub trait IdentityCache: Send + Sync {
    fn get_label(&self, label: &Label) -> Option<LabelId>;

    fn set_label(&self, label: &Label, id: LabelId) -> Result<(), CacheError>;

    fn get_series(&self, fingerprint: Fingerprint) -> Option<SeriesId>;

    fn set_series(&self, fingerprint: Fingerprint, id: SeriesId) -> Result<(), CacheError>;

    fn get_metric_table(&self, metric_name: &str) -> Option<MetricTable>;

    fn set_metric_table(&self, metric_name: &str, table: MetricTable) -> Result<(), CacheError>;

    fn stats(&self) -> CacheStats;
}
