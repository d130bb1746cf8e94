//! Ingestor - one ingestion call end to end

use crate::backend::Backend;
use crate::cache::IdentityCache;
use crate::ingest::{BatchResolver, IngestError, IngestResult};
use crate::series::{LabelSet, SampleRow, TimeSeries};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Entry point for writing batches of time series
///
/// Cheap to clone; clones share the backend and the cache.
#[derive(Clone)]
pub struct Ingestor {
    backend: Arc<dyn Backend>,
    cache: Arc<dyn IdentityCache>,
}

impl Ingestor {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<dyn IdentityCache>) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &Arc<dyn IdentityCache> {
        &self.cache
    }

    /// Store one batch, returning the number of sample rows written
    ///
    /// Every series must carry a `__name__` label; one that does not
    /// rejects the whole batch before anything is resolved. Series without
    /// samples are validated but not stored.
    ///
    /// On error nothing is counted. Labels and series resolved before the
    /// failure stay in the catalog and the cache.
    pub async fn ingest(&self, batch: &[TimeSeries]) -> IngestResult<u64> {
        let sets = validate(batch)?;

        let active: Vec<(&LabelSet, &TimeSeries)> = sets
            .iter()
            .zip(batch)
            .filter(|(_, series)| !series.samples.is_empty())
            .collect();
        if active.is_empty() {
            return Ok(0);
        }

        let mut resolver = BatchResolver::new(self.backend.as_ref(), self.cache.as_ref());

        for (set, _) in &active {
            for label in set.labels() {
                resolver.add_label(label);
            }
        }
        resolver.insert_labels().await?;

        for (set, _) in &active {
            resolver.add_series(set);
        }
        resolver.insert_series().await?;

        let mut rows: BTreeMap<String, Vec<SampleRow>> = BTreeMap::new();
        for (set, series) in &active {
            let fingerprint = set.fingerprint();
            let series_id = resolver
                .series_id(fingerprint)
                .ok_or(IngestError::MissingSeriesId(fingerprint))?;
            let metric_name = set.metric_name().ok_or(IngestError::NoMetricName)?;

            rows.entry(metric_name.to_string())
                .or_default()
                .extend(series.samples.iter().map(|s| SampleRow::new(series_id, s)));
        }

        let written = resolver.insert_data(rows).await?;
        tracing::debug!(series = active.len(), samples = written, "Ingested batch");
        Ok(written)
    }
}

/// Normalize every series, failing on the first one without a metric name
fn validate(batch: &[TimeSeries]) -> IngestResult<Vec<LabelSet>> {
    batch
        .iter()
        .map(|series| {
            let set = LabelSet::from_labels(&series.labels);
            match set.metric_name() {
                Some(_) => Ok(set),
                None => {
                    tracing::warn!(labels = %set, "Rejecting batch: series has no metric name");
                    Err(IngestError::NoMetricName)
                }
            }
        })
        .collect()
}
