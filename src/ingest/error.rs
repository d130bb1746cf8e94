//! Ingestion error types

use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::series::{Fingerprint, Label, METRIC_NAME_LABEL};
use thiserror::Error;

/// Errors that abort an ingestion call
#[derive(Error, Debug)]
pub enum IngestError {
    /// A series in the batch carries no metric name; nothing was written
    #[error("No metric name label ({}) in series", METRIC_NAME_LABEL)]
    NoMetricName,

    /// Writing a resolved identity to the cache failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A backend primitive failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A series referenced a label the label stage did not resolve
    #[error("Label {0} was not resolved before the series stage")]
    MissingLabelId(Label),

    /// A series with samples had no ID after the series stage
    #[error("Series {0:016x} was not resolved before the data stage")]
    MissingSeriesId(Fingerprint),

    /// A batch primitive answered with the wrong number of IDs
    #[error("Backend returned {returned} IDs for {requested} {kind}")]
    ResolutionMismatch {
        kind: &'static str,
        requested: usize,
        returned: usize,
    },
}

/// Result type alias for ingestion
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            IngestError::NoMetricName.to_string(),
            "No metric name label (__name__) in series"
        );

        let err: IngestError = BackendError::Internal("boom".into()).into();
        assert_eq!(err.to_string(), "Backend error: Backend error: boom");

        let err = IngestError::MissingLabelId(Label::new("job", "node"));
        assert_eq!(
            err.to_string(),
            "Label job=\"node\" was not resolved before the series stage"
        );
    }
}
