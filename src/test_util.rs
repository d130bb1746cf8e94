//! Test doubles for the backend and the cache
//!
//! `RecordingBackend` keeps its catalog in memory, records every request
//! it receives and can be told to fail or stall any primitive.
//! `FaultyCache` wraps a `MemoryCache` and refuses writes on demand.

use crate::backend::{allocate_table_name, Backend, BackendError, BackendResult};
use crate::cache::{CacheError, CacheStats, IdentityCache, MemoryCache};
use crate::series::{
    Fingerprint, Label, LabelId, MetricTable, MetricTableId, SampleRow, SeriesId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Backend primitives, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    MetricTable,
    Labels,
    Series,
    InsertRows,
}

#[derive(Default)]
struct State {
    labels: HashMap<Label, LabelId>,
    series: HashMap<(String, Vec<LabelId>), SeriesId>,
    tables: HashMap<String, MetricTable>,
    rows: HashMap<MetricTableId, Vec<SampleRow>>,

    label_requests: Vec<Label>,
    series_requests: Vec<(String, Vec<LabelId>)>,
    table_requests: Vec<String>,

    calls: HashMap<BackendOp, usize>,
    failures: HashMap<BackendOp, String>,
}

impl State {
    /// Count the call, then fail it if a failure is armed
    fn enter(&mut self, op: BackendOp) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get(&op) {
            Some(message) => Err(BackendError::Internal(message.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory, idempotent backend that records what it was asked
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<State>,
    delay: Option<Duration>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: stall every call for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Make every call to `op` fail with `BackendError::Internal(message)`
    pub fn fail(&self, op: BackendOp, message: &str) {
        self.state().failures.insert(op, message.to_string());
    }

    pub fn clear_failure(&self, op: BackendOp) {
        self.state().failures.remove(&op);
    }

    /// Round trips made to `op`
    pub fn calls(&self, op: BackendOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every label the backend was asked to resolve, in request order
    pub fn label_requests(&self) -> Vec<Label> {
        self.state().label_requests.clone()
    }

    /// Every (metric, label IDs) pair the backend was asked to resolve
    pub fn series_requests(&self) -> Vec<(String, Vec<LabelId>)> {
        self.state().series_requests.clone()
    }

    /// Every metric name the backend was asked for a table
    pub fn table_requests(&self) -> Vec<String> {
        self.state().table_requests.clone()
    }

    /// Distinct series in the catalog
    pub fn series_count(&self) -> usize {
        self.state().series.len()
    }

    pub fn label_id(&self, label: &Label) -> Option<LabelId> {
        self.state().labels.get(label).copied()
    }

    /// Rows stored for one metric
    pub fn rows(&self, metric_name: &str) -> Vec<SampleRow> {
        let state = self.state();
        let rows = state
            .tables
            .get(metric_name)
            .and_then(|table| state.rows.get(&table.id))
            .cloned()
            .unwrap_or_default();
        rows
    }

    /// Rows stored across all metrics
    pub fn total_rows(&self) -> usize {
        self.state().rows.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn get_or_create_metric_table(&self, metric_name: &str) -> BackendResult<MetricTable> {
        self.pause().await;

        let mut state = self.state();
        state.enter(BackendOp::MetricTable)?;
        state.table_requests.push(metric_name.to_string());

        if let Some(table) = state.tables.get(metric_name) {
            return Ok(table.clone());
        }

        let id = state.tables.len() as MetricTableId + 1;
        let table_name = allocate_table_name(metric_name, id, |candidate| {
            Ok(state
                .tables
                .values()
                .any(|t| t.table_name.eq_ignore_ascii_case(candidate)))
        })?;
        let table = MetricTable { id, table_name };
        state.tables.insert(metric_name.to_string(), table.clone());
        Ok(table)
    }

    async fn get_or_create_label_id(&self, label: &Label) -> BackendResult<LabelId> {
        self.get_or_create_label_ids(std::slice::from_ref(label))
            .await?
            .pop()
            .ok_or_else(|| BackendError::Internal("no label ID returned".into()))
    }

    async fn get_or_create_series_id(
        &self,
        metric_name: &str,
        label_ids: &[LabelId],
    ) -> BackendResult<SeriesId> {
        self.get_or_create_series_ids(&[(metric_name.to_string(), label_ids.to_vec())])
            .await?
            .pop()
            .ok_or_else(|| BackendError::Internal("no series ID returned".into()))
    }

    async fn insert_rows(&self, table: &MetricTable, rows: &[SampleRow]) -> BackendResult<u64> {
        self.pause().await;

        let mut state = self.state();
        state.enter(BackendOp::InsertRows)?;
        state
            .rows
            .entry(table.id)
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn get_or_create_label_ids(&self, labels: &[Label]) -> BackendResult<Vec<LabelId>> {
        self.pause().await;

        let mut state = self.state();
        state.enter(BackendOp::Labels)?;
        state.label_requests.extend_from_slice(labels);

        let ids = labels
            .iter()
            .map(|label| {
                let next = state.labels.len() as LabelId + 1;
                *state.labels.entry(label.clone()).or_insert(next)
            })
            .collect();
        Ok(ids)
    }

    async fn get_or_create_series_ids(
        &self,
        series: &[(String, Vec<LabelId>)],
    ) -> BackendResult<Vec<SeriesId>> {
        self.pause().await;

        let mut state = self.state();
        state.enter(BackendOp::Series)?;
        state.series_requests.extend_from_slice(series);

        let ids = series
            .iter()
            .map(|key| {
                let next = state.series.len() as SeriesId + 1;
                *state.series.entry(key.clone()).or_insert(next)
            })
            .collect();
        Ok(ids)
    }
}

/// Memory cache that fails label or series writes on demand
#[derive(Default)]
pub struct FaultyCache {
    inner: MemoryCache,
    fail_labels: AtomicBool,
    fail_series: AtomicBool,
}

impl FaultyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_set_label(&self, fail: bool) {
        self.fail_labels.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set_series(&self, fail: bool) {
        self.fail_series.store(fail, Ordering::SeqCst);
    }
}

impl IdentityCache for FaultyCache {
    fn get_label(&self, label: &Label) -> Option<LabelId> {
        self.inner.get_label(label)
    }

    fn set_label(&self, label: &Label, id: LabelId) -> Result<(), CacheError> {
        if self.fail_labels.load(Ordering::SeqCst) {
            return Err(CacheError::WriteFailed(format!("label {}", label)));
        }
        self.inner.set_label(label, id)
    }

    fn get_series(&self, fingerprint: Fingerprint) -> Option<SeriesId> {
        self.inner.get_series(fingerprint)
    }

    fn set_series(&self, fingerprint: Fingerprint, id: SeriesId) -> Result<(), CacheError> {
        if self.fail_series.load(Ordering::SeqCst) {
            return Err(CacheError::WriteFailed(format!("series {:016x}", fingerprint)));
        }
        self.inner.set_series(fingerprint, id)
    }

    fn get_metric_table(&self, metric_name: &str) -> Option<MetricTable> {
        self.inner.get_metric_table(metric_name)
    }

    fn set_metric_table(&self, metric_name: &str, table: MetricTable) -> Result<(), CacheError> {
        self.inner.set_metric_table(metric_name, table)
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
