//! Batch Resolver
//!
//! Collects the labels and series of one ingestion call that missed the
//! cache and resolves each kind with a single backend round trip.
//!
//! ```text
//! add_label ──► pending labels ──► insert_labels ──► cache + local map
//!                                                          │
//! add_series ─► pending series ──► insert_series ◄─────────┘
//!                                        │
//!                                        ▼
//!                               cache + local map ──► insert_data
//! ```
//!
//! Cache writes only happen after the backend answered, so a call that is
//! dropped mid-flight never caches an ID it did not receive.

use crate::backend::Backend;
use crate::cache::IdentityCache;
use crate::ingest::{IngestError, IngestResult};
use crate::series::{Fingerprint, Label, LabelId, LabelSet, SampleRow, SeriesId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-call resolution state
pub struct BatchResolver<'a> {
    backend: &'a dyn Backend,
    cache: &'a dyn IdentityCache,

    label_ids: HashMap<Label, LabelId>,
    pending_labels: Vec<Label>,
    queued_labels: HashSet<Label>,

    series_ids: HashMap<Fingerprint, SeriesId>,
    pending_series: Vec<LabelSet>,
    queued_series: HashSet<Fingerprint>,
}

impl<'a> BatchResolver<'a> {
    pub fn new(backend: &'a dyn Backend, cache: &'a dyn IdentityCache) -> Self {
        Self {
            backend,
            cache,
            label_ids: HashMap::new(),
            pending_labels: Vec::new(),
            queued_labels: HashSet::new(),
            series_ids: HashMap::new(),
            pending_series: Vec::new(),
            queued_series: HashSet::new(),
        }
    }

    /// Queue `label` unless it is already known
    pub fn add_label(&mut self, label: &Label) {
        if self.label_ids.contains_key(label) || self.queued_labels.contains(label) {
            return;
        }
        match self.cache.get_label(label) {
            Some(id) => {
                self.label_ids.insert(label.clone(), id);
            }
            None => {
                self.queued_labels.insert(label.clone());
                self.pending_labels.push(label.clone());
            }
        }
    }

    /// Resolve every queued label in one backend call
    ///
    /// Returns the labels resolved through the backend.
    pub async fn insert_labels(&mut self) -> IngestResult<Vec<(Label, LabelId)>> {
        if self.pending_labels.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self
            .backend
            .get_or_create_label_ids(&self.pending_labels)
            .await?;
        check_len("labels", self.pending_labels.len(), ids.len())?;

        let pending = std::mem::take(&mut self.pending_labels);
        self.queued_labels.clear();

        let mut resolved = Vec::with_capacity(pending.len());
        for (label, id) in pending.into_iter().zip(ids) {
            self.cache.set_label(&label, id)?;
            self.label_ids.insert(label.clone(), id);
            resolved.push((label, id));
        }

        tracing::debug!(labels = resolved.len(), "Resolved labels");
        Ok(resolved)
    }

    /// Queue a series unless its fingerprint is already known
    pub fn add_series(&mut self, set: &LabelSet) {
        let fingerprint = set.fingerprint();
        if self.series_ids.contains_key(&fingerprint) || self.queued_series.contains(&fingerprint) {
            return;
        }
        match self.cache.get_series(fingerprint) {
            Some(id) => {
                self.series_ids.insert(fingerprint, id);
            }
            None => {
                self.queued_series.insert(fingerprint);
                self.pending_series.push(set.clone());
            }
        }
    }

    /// Resolve every queued series in one backend call
    ///
    /// Every label of a queued series must have been resolved by
    /// [`insert_labels`](Self::insert_labels) first.
    pub async fn insert_series(&mut self) -> IngestResult<Vec<(Fingerprint, SeriesId)>> {
        if self.pending_series.is_empty() {
            return Ok(Vec::new());
        }

        let requests = self
            .pending_series
            .iter()
            .map(|set| self.series_key(set))
            .collect::<IngestResult<Vec<_>>>()?;

        let ids = self.backend.get_or_create_series_ids(&requests).await?;
        check_len("series", requests.len(), ids.len())?;

        let pending = std::mem::take(&mut self.pending_series);
        self.queued_series.clear();

        let mut resolved = Vec::with_capacity(pending.len());
        for (set, id) in pending.iter().zip(ids) {
            let fingerprint = set.fingerprint();
            self.cache.set_series(fingerprint, id)?;
            self.series_ids.insert(fingerprint, id);
            resolved.push((fingerprint, id));
        }

        tracing::debug!(series = resolved.len(), "Resolved series");
        Ok(resolved)
    }

    /// Metric name and label IDs ordered by label name
    fn series_key(&self, set: &LabelSet) -> IngestResult<(String, Vec<LabelId>)> {
        let metric_name = set.metric_name().ok_or(IngestError::NoMetricName)?;
        let label_ids = set
            .labels()
            .iter()
            .map(|label| {
                self.label_ids
                    .get(label)
                    .copied()
                    .ok_or_else(|| IngestError::MissingLabelId(label.clone()))
            })
            .collect::<IngestResult<Vec<_>>>()?;
        Ok((metric_name.to_string(), label_ids))
    }

    /// Series ID resolved during this call, from the cache or the backend
    pub fn series_id(&self, fingerprint: Fingerprint) -> Option<SeriesId> {
        self.series_ids.get(&fingerprint).copied()
    }

    /// Append rows, grouped by metric name, to their metric tables
    ///
    /// Returns the number of rows the backend accepted.
    pub async fn insert_data(&self, rows: BTreeMap<String, Vec<SampleRow>>) -> IngestResult<u64> {
        let mut written = 0u64;

        for (metric_name, rows) in &rows {
            match self.append(metric_name, rows).await {
                Ok(accepted) => written += accepted,
                Err(e) => {
                    if written > 0 {
                        tracing::warn!(
                            rows = written,
                            metric = %metric_name,
                            "Rows of earlier metrics were stored before the failure"
                        );
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(rows = written, metrics = rows.len(), "Inserted rows");
        Ok(written)
    }

    async fn append(&self, metric_name: &str, rows: &[SampleRow]) -> IngestResult<u64> {
        let table = match self.cache.get_metric_table(metric_name) {
            Some(table) => table,
            None => {
                let table = self.backend.get_or_create_metric_table(metric_name).await?;
                self.cache.set_metric_table(metric_name, table.clone())?;
                table
            }
        };
        Ok(self.backend.insert_rows(&table, rows).await?)
    }
}

fn check_len(kind: &'static str, requested: usize, returned: usize) -> IngestResult<()> {
    if requested != returned {
        return Err(IngestError::ResolutionMismatch {
            kind,
            requested,
            returned,
        });
    }
    Ok(())
}
