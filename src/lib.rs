//! # promingest
//!
//! Ingests batches of Prometheus-style time series into a normalized
//! catalog: every distinct label and every distinct label set gets a
//! stable integer ID, and samples reference their series by that ID.
//!
//! ## Modules
//!
//! - [`series`]: Labels, label sets, fingerprints and sample rows
//! - [`cache`]: Process-local identity cache shared by concurrent calls
//! - [`backend`]: Idempotent get-or-create primitives, SQLite implementation
//! - [`ingest`]: Batch resolver and the ingestion pipeline
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use promingest::backend::SqliteBackend;
//! use promingest::cache::MemoryCache;
//! use promingest::config::StorageConfig;
//! use promingest::ingest::Ingestor;
//! use promingest::series::TimeSeries;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the catalog, migrating it if needed
//!     let backend = SqliteBackend::open(&StorageConfig::default())?;
//!     let ingestor = Ingestor::new(Arc::new(backend), Arc::new(MemoryCache::new()));
//!
//!     let batch = vec![TimeSeries::new()
//!         .label("__name__", "http_requests_total")
//!         .label("job", "api")
//!         .sample(1_700_000_000_000, 1027.0)];
//!
//!     let written = ingestor.ingest(&batch).await?;
//!     println!("Stored {} samples", written);
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod series;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export top-level types for convenience
pub use series::{
    Fingerprint, Label, LabelId, LabelSet, MetricTable, Sample, SampleRow, SeriesId, TimeSeries,
};

pub use cache::{CacheError, CacheStats, IdentityCache, MemoryCache};

pub use backend::{Backend, BackendError, BackendResult, SchemaError, SqliteBackend};

pub use ingest::{BatchResolver, IngestError, IngestResult, Ingestor};

pub use config::{Config, ConfigError, LoggingConfig, StorageConfig};
