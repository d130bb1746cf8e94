//! Ingestion Pipeline
//!
//! One ingestion call runs in strict stages, each finishing (cache
//! included) before the next starts:
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌─────────────┐
//! │ validate │──►│   labels   │──►│   series   │──►│ sample rows │
//! │ __name__ │   │ cache/back │   │ cache/back │   │ per metric  │
//! └──────────┘   └────────────┘   └────────────┘   └─────────────┘
//! ```
//!
//! Misses are batched by [`BatchResolver`], so a label or series that
//! appears many times in a batch is resolved once.

mod error;
mod ingestor;
mod resolver;

pub use error::{IngestError, IngestResult};
pub use ingestor::Ingestor;
pub use resolver::BatchResolver;
