//! SQLite Storage Backend
//!
//! Catalog and samples live in one SQLite database. Get-or-create runs as
//! `BEGIN IMMEDIATE` + `INSERT .. ON CONFLICT DO NOTHING` + `SELECT`, so
//! the UNIQUE constraint on the content decides the winner of a race and
//! every loser reads the winner's row.
//!
//! All calls run on the blocking thread pool and hold one pooled
//! connection for the length of a single primitive.

use crate::backend::naming::{allocate_table_name, data_index, data_table, quote_ident};
use crate::backend::schema::{self, SchemaState, DEFAULT_CHUNK_INTERVAL_MS};
use crate::backend::{Backend, BackendError, BackendResult, ConnectionPool};
use crate::config::StorageConfig;
use crate::series::{Label, LabelId, LabelSet, MetricTable, SampleRow, SeriesId};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;

const CHUNK_INTERVAL_KEY: &str = "chunk_interval_ms";

/// Number of catalog entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub labels: u64,
    pub series: u64,
    pub metrics: u64,
}

impl std::fmt::Display for CatalogStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} labels, {} series, {} metrics",
            self.labels, self.series, self.metrics
        )
    }
}

/// Catalog entry of one metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricInfo {
    pub metric_name: String,
    pub table: MetricTable,
    /// Per-metric override; `None` means the default applies
    pub chunk_interval: Option<Duration>,
}

/// SQLite-backed catalog and sample store
#[derive(Clone)]
pub struct SqliteBackend {
    pool: Arc<ConnectionPool>,
}

impl SqliteBackend {
    /// Open the connection pool without touching the schema
    pub fn connect(config: &StorageConfig) -> BackendResult<Self> {
        let pool = ConnectionPool::open(
            &config.resolved_db_path(),
            config.pool_size,
            Duration::from_millis(config.busy_timeout_ms),
        )?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Open the backend and pass the schema gate
    ///
    /// Migrates first when `auto_migrate` is set. Refuses a dirty,
    /// uninitialized or foreign schema either way.
    pub fn open(config: &StorageConfig) -> BackendResult<Self> {
        let backend = Self::connect(config)?;

        backend.pool.with_connection(|conn| {
            if config.auto_migrate {
                schema::migrate(conn)?;
            }
            schema::check_schema(conn)
        })?;

        if let Some(secs) = config.default_chunk_interval_secs {
            let interval = Duration::from_secs(secs);
            backend
                .pool
                .with_connection(|conn| write_default_chunk_interval(conn, interval))?;
        }

        tracing::info!(
            "Opened catalog at {:?} ({} connections)",
            backend.pool.path(),
            backend.pool.size()
        );

        Ok(backend)
    }

    async fn run<T, F>(&self, f: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> BackendResult<T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || pool.with_connection(f)).await?
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> BackendResult<i64> {
        self.run(schema::migrate).await
    }

    pub async fn check_schema(&self) -> BackendResult<()> {
        self.run(|conn| schema::check_schema(conn)).await
    }

    pub async fn schema_state(&self) -> BackendResult<Option<SchemaState>> {
        self.run(|conn| schema::schema_state(conn)).await
    }

    /// Chunk interval used by metrics without an override
    pub async fn default_chunk_interval(&self) -> BackendResult<Duration> {
        self.run(|conn| read_default_chunk_interval(conn)).await
    }

    pub async fn set_default_chunk_interval(&self, interval: Duration) -> BackendResult<()> {
        self.run(move |conn| write_default_chunk_interval(conn, interval))
            .await
    }

    /// Override the chunk interval of one metric, creating the metric if needed
    pub async fn set_metric_chunk_interval(
        &self,
        metric_name: &str,
        interval: Duration,
    ) -> BackendResult<MetricTable> {
        let metric_name = metric_name.to_string();
        self.run(move |conn| {
            let ms = interval_ms(interval)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let table = metric_table(&tx, &metric_name)?;
            tx.execute(
                "UPDATE metric SET chunk_interval_ms = ?1 WHERE id = ?2",
                params![ms, table.id],
            )?;
            tx.commit()?;
            Ok(table)
        })
        .await
    }

    /// Drop the override of one metric so the default applies again
    pub async fn reset_metric_chunk_interval(&self, metric_name: &str) -> BackendResult<()> {
        let metric_name = metric_name.to_string();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE metric SET chunk_interval_ms = NULL WHERE metric_name = ?1",
                params![metric_name],
            )?;
            if updated == 0 {
                return Err(BackendError::NotFound(format!("metric {:?}", metric_name)));
            }
            Ok(())
        })
        .await
    }

    /// Effective chunk interval of a metric: its override, else the default
    pub async fn chunk_interval(&self, metric_name: &str) -> BackendResult<Duration> {
        let metric_name = metric_name.to_string();
        self.run(move |conn| {
            let overridden: Option<i64> = conn
                .query_row(
                    "SELECT chunk_interval_ms FROM metric WHERE metric_name = ?1",
                    params![metric_name],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            match overridden {
                Some(ms) => Ok(millis(ms)),
                None => read_default_chunk_interval(conn),
            }
        })
        .await
    }

    /// Labels of a series, ordered by name
    pub async fn series_labels(&self, series_id: SeriesId) -> BackendResult<Vec<Label>> {
        self.run(move |conn| {
            let encoded: String = conn
                .query_row(
                    "SELECT labels FROM series WHERE id = ?1",
                    params![series_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| BackendError::NotFound(format!("series {}", series_id)))?;
            let label_ids: Vec<LabelId> = serde_json::from_str(&encoded)?;

            let mut stmt = conn.prepare_cached("SELECT name, value FROM label WHERE id = ?1")?;
            let mut labels = Vec::with_capacity(label_ids.len());
            for id in &label_ids {
                let label = stmt
                    .query_row(params![id], |row| {
                        Ok(Label::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .optional()?
                    .ok_or_else(|| BackendError::NotFound(format!("label {}", id)))?;
                labels.push(label);
            }
            Ok(labels)
        })
        .await
    }

    /// Label IDs of a series given as parallel key and value arrays
    ///
    /// The labels are normalized like ingested ones, so the result is the
    /// ID list the series is stored under. Missing labels are created.
    pub async fn label_ids_for_key_values(
        &self,
        metric_name: &str,
        keys: &[String],
        values: &[String],
    ) -> BackendResult<Vec<LabelId>> {
        let set = key_value_label_set(metric_name, keys, values)?;
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let ids = upsert_label_set(&tx, &set)?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    /// Get or create the series given as parallel key and value arrays
    pub async fn series_id_for_key_values(
        &self,
        metric_name: &str,
        keys: &[String],
        values: &[String],
    ) -> BackendResult<SeriesId> {
        let set = key_value_label_set(metric_name, keys, values)?;
        let metric_name = metric_name.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let label_ids = upsert_label_set(&tx, &set)?;
            let id = upsert_series(&tx, &metric_name, &label_ids)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    pub async fn catalog_stats(&self) -> BackendResult<CatalogStats> {
        self.run(|conn| {
            let count = |table: &str| -> BackendResult<u64> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };
            Ok(CatalogStats {
                labels: count("label")?,
                series: count("series")?,
                metrics: count("metric")?,
            })
        })
        .await
    }

    /// Every metric in the catalog, ordered by name
    pub async fn list_metrics(&self) -> BackendResult<Vec<MetricInfo>> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT metric_name, id, table_name, chunk_interval_ms
                 FROM metric ORDER BY metric_name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(MetricInfo {
                    metric_name: row.get(0)?,
                    table: MetricTable {
                        id: row.get(1)?,
                        table_name: row.get(2)?,
                    },
                    chunk_interval: row.get::<_, Option<i64>>(3)?.map(millis),
                })
            })?;
            let metrics = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(metrics)
        })
        .await
    }

    /// Number of stored sample rows for a metric
    pub async fn row_count(&self, metric_name: &str) -> BackendResult<u64> {
        let metric_name = metric_name.to_string();
        self.run(move |conn| {
            let table = find_metric_table(conn, &metric_name)?
                .ok_or_else(|| BackendError::NotFound(format!("metric {:?}", metric_name)))?;
            let n: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {}",
                    quote_ident(&data_table(&table.table_name))
                ),
                [],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn get_or_create_metric_table(&self, metric_name: &str) -> BackendResult<MetricTable> {
        let metric_name = metric_name.to_string();
        self.run(move |conn| {
            if let Some(table) = find_metric_table(conn, &metric_name)? {
                return Ok(table);
            }
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let table = metric_table(&tx, &metric_name)?;
            tx.commit()?;
            Ok(table)
        })
        .await
    }

    async fn get_or_create_label_id(&self, label: &Label) -> BackendResult<LabelId> {
        let label = label.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = upsert_label(&tx, &label)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn get_or_create_series_id(
        &self,
        metric_name: &str,
        label_ids: &[LabelId],
    ) -> BackendResult<SeriesId> {
        let metric_name = metric_name.to_string();
        let label_ids = label_ids.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let id = upsert_series(&tx, &metric_name, &label_ids)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn insert_rows(&self, table: &MetricTable, rows: &[SampleRow]) -> BackendResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {} (time, value, series_id) VALUES (?1, ?2, ?3)",
            quote_ident(&data_table(&table.table_name))
        );
        let rows = rows.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut inserted = 0u64;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for row in &rows {
                    inserted += stmt.execute(params![row.timestamp, row.value, row.series_id])? as u64;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn get_or_create_label_ids(&self, labels: &[Label]) -> BackendResult<Vec<LabelId>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let labels = labels.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let ids = labels
                .iter()
                .map(|label| upsert_label(&tx, label))
                .collect::<BackendResult<Vec<_>>>()?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn get_or_create_series_ids(
        &self,
        series: &[(String, Vec<LabelId>)],
    ) -> BackendResult<Vec<SeriesId>> {
        if series.is_empty() {
            return Ok(Vec::new());
        }

        let series = series.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let ids = series
                .iter()
                .map(|(metric_name, label_ids)| upsert_series(&tx, metric_name, label_ids))
                .collect::<BackendResult<Vec<_>>>()?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }
}

fn upsert_label(conn: &Connection, label: &Label) -> BackendResult<LabelId> {
    conn.prepare_cached(
        "INSERT INTO label (name, value) VALUES (?1, ?2)
         ON CONFLICT (name, value) DO NOTHING",
    )?
    .execute(params![label.name, label.value])?;

    let id = conn
        .prepare_cached("SELECT id FROM label WHERE name = ?1 AND value = ?2")?
        .query_row(params![label.name, label.value], |row| row.get(0))?;
    Ok(id)
}

fn upsert_series(conn: &Connection, metric_name: &str, label_ids: &[LabelId]) -> BackendResult<SeriesId> {
    let labels = serde_json::to_string(label_ids)?;

    conn.prepare_cached(
        "INSERT INTO series (metric_name, labels) VALUES (?1, ?2)
         ON CONFLICT (metric_name, labels) DO NOTHING",
    )?
    .execute(params![metric_name, labels])?;

    let id = conn
        .prepare_cached("SELECT id FROM series WHERE metric_name = ?1 AND labels = ?2")?
        .query_row(params![metric_name, labels], |row| row.get(0))?;
    Ok(id)
}

/// Pair up keys and values; `metric_name` wins over a `__name__` key
fn key_value_label_set(
    metric_name: &str,
    keys: &[String],
    values: &[String],
) -> BackendResult<LabelSet> {
    if keys.len() != values.len() {
        return Err(BackendError::KeyValueMismatch {
            keys: keys.len(),
            values: values.len(),
        });
    }

    let mut labels: Vec<Label> = keys
        .iter()
        .zip(values)
        .map(|(key, value)| Label::new(key.as_str(), value.as_str()))
        .collect();
    labels.push(Label::metric_name(metric_name));
    Ok(LabelSet::from_labels(&labels))
}

fn upsert_label_set(conn: &Connection, set: &LabelSet) -> BackendResult<Vec<LabelId>> {
    set.labels()
        .iter()
        .map(|label| upsert_label(conn, label))
        .collect()
}

fn find_metric_table(conn: &Connection, metric_name: &str) -> BackendResult<Option<MetricTable>> {
    let table = conn
        .prepare_cached("SELECT id, table_name FROM metric WHERE metric_name = ?1")?
        .query_row(params![metric_name], |row| {
            Ok(MetricTable {
                id: row.get(0)?,
                table_name: row.get(1)?,
            })
        })
        .optional()?;
    Ok(table)
}

/// Find or create a metric table; the caller owns the write transaction
fn metric_table(conn: &Connection, metric_name: &str) -> BackendResult<MetricTable> {
    if let Some(table) = find_metric_table(conn, metric_name)? {
        return Ok(table);
    }

    conn.execute(
        "INSERT INTO metric (metric_name) VALUES (?1)",
        params![metric_name],
    )?;
    let id = conn.last_insert_rowid();

    // SQLite identifiers fold ASCII case, so `up` and `Up` would share a table
    let table_name = allocate_table_name(metric_name, id, |candidate| {
        let taken: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM metric WHERE table_name = ?1 COLLATE NOCASE)
                 OR EXISTS (SELECT 1 FROM sqlite_master WHERE name = ?2 COLLATE NOCASE)",
            params![candidate, data_table(candidate)],
            |row| row.get(0),
        )?;
        Ok(taken)
    })?;

    conn.execute(
        "UPDATE metric SET table_name = ?1 WHERE id = ?2",
        params![table_name, id],
    )?;

    let data = data_table(&table_name);
    conn.execute_batch(&format!(
        "CREATE TABLE {table} (
            time INTEGER NOT NULL,
            value REAL,
            series_id INTEGER NOT NULL
        );
        CREATE INDEX {index} ON {table} (series_id, time);",
        table = quote_ident(&data),
        index = quote_ident(&data_index(&table_name)),
    ))?;

    tracing::info!(
        metric = metric_name,
        table = %table_name,
        id,
        "Created metric table"
    );

    Ok(MetricTable { id, table_name })
}

fn read_default_chunk_interval(conn: &Connection) -> BackendResult<Duration> {
    let ms: Option<i64> = conn
        .query_row(
            "SELECT value FROM default_setting WHERE key = ?1",
            params![CHUNK_INTERVAL_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(millis(ms.unwrap_or(DEFAULT_CHUNK_INTERVAL_MS)))
}

fn write_default_chunk_interval(conn: &Connection, interval: Duration) -> BackendResult<()> {
    let ms = interval_ms(interval)?;
    conn.execute(
        "INSERT INTO default_setting (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![CHUNK_INTERVAL_KEY, ms],
    )?;
    Ok(())
}

fn interval_ms(interval: Duration) -> BackendResult<i64> {
    i64::try_from(interval.as_millis())
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or(BackendError::InvalidChunkInterval(interval))
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SchemaError;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::tempdir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn test_config(dir: &Path) -> StorageConfig {
        StorageConfig {
            db_path: dir.join("catalog.db").to_string_lossy().to_string(),
            pool_size: 4,
            ..StorageConfig::default()
        }
    }

    fn open(dir: &Path) -> SqliteBackend {
        SqliteBackend::open(&test_config(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_open_migrates() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        assert_eq!(
            backend.schema_state().await.unwrap(),
            Some(SchemaState {
                version: schema::SCHEMA_VERSION,
                dirty: false,
            })
        );
        assert_eq!(backend.catalog_stats().await.unwrap(), CatalogStats::default());
    }

    #[tokio::test]
    async fn test_open_without_migration_refuses_empty_database() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            auto_migrate: false,
            ..test_config(dir.path())
        };

        let result = SqliteBackend::open(&config);
        assert!(matches!(
            result,
            Err(BackendError::Schema(SchemaError::Uninitialized))
        ));

        // Explicit migration makes it usable
        let backend = SqliteBackend::connect(&config).unwrap();
        assert_eq!(backend.migrate().await.unwrap(), schema::SCHEMA_VERSION);
        SqliteBackend::open(&config).unwrap();
    }

    #[tokio::test]
    async fn test_open_refuses_dirty_schema() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        drop(SqliteBackend::open(&config).unwrap());

        let conn = Connection::open(&config.db_path).unwrap();
        conn.execute("UPDATE schema_migrations SET dirty = 1", [])
            .unwrap();
        drop(conn);

        let result = SqliteBackend::open(&config);
        assert!(matches!(
            result,
            Err(BackendError::Schema(SchemaError::Dirty(1)))
        ));
    }

    #[test]
    fn test_concurrent_open_of_fresh_database() {
        for _ in 0..10 {
            let dir = tempdir().unwrap();
            let config = test_config(dir.path());

            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let config = config.clone();
                    std::thread::spawn(move || SqliteBackend::open(&config).map(drop))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }

            let conn = Connection::open(&config.db_path).unwrap();
            assert_eq!(
                schema::schema_state(&conn).unwrap(),
                Some(SchemaState {
                    version: schema::SCHEMA_VERSION,
                    dirty: false,
                })
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_label_creation_converges() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let label = Label::new("job", "node");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let backend = backend.clone();
                let label = label.clone();
                tokio::spawn(async move { backend.get_or_create_label_id(&label).await.unwrap() })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(backend.catalog_stats().await.unwrap().labels, 1);

        let other = backend
            .get_or_create_label_id(&Label::new("job", "api"))
            .await
            .unwrap();
        assert!(!ids.contains(&other));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_series_creation_converges() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let label_ids = backend
            .get_or_create_label_ids(&[Label::metric_name("up"), Label::new("job", "node")])
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let backend = backend.clone();
                let label_ids = label_ids.clone();
                tokio::spawn(async move {
                    backend
                        .get_or_create_series_id("up", &label_ids)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(backend.catalog_stats().await.unwrap().series, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_metric_table_creation_converges() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .get_or_create_metric_table("http_requests_total")
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut tables = HashSet::new();
        for handle in handles {
            tables.insert(handle.await.unwrap());
        }

        assert_eq!(tables.len(), 1);
        let table = tables.into_iter().next().unwrap();
        assert_eq!(table.table_name, "http_requests_total");
        assert_eq!(backend.catalog_stats().await.unwrap().metrics, 1);
    }

    #[tokio::test]
    async fn test_batch_label_ids_keep_input_order() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        let a = backend.get_or_create_label_id(&Label::new("a", "1")).await.unwrap();
        let ids = backend
            .get_or_create_label_ids(&[Label::new("b", "2"), Label::new("a", "1")])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1], a);
        assert_ne!(ids[0], a);
    }

    #[tokio::test]
    async fn test_series_identity_depends_on_metric_and_labels() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        let first = backend
            .get_or_create_series_ids(&[
                ("up".to_string(), vec![1, 2]),
                ("up".to_string(), vec![1, 3]),
                ("down".to_string(), vec![1, 2]),
                ("up".to_string(), vec![1, 2]),
            ])
            .await
            .unwrap();

        assert_eq!(first[0], first[3]);
        assert_ne!(first[0], first[1]);
        assert_ne!(first[0], first[2]);
        assert_eq!(backend.catalog_stats().await.unwrap().series, 3);
    }

    #[tokio::test]
    async fn test_long_metric_names() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let long_1 = "test_metric_very_very_long_name_have_to_truncate_it_longer_than_64_chars_1";
        let long_2 = "test_metric_very_very_long_name_have_to_truncate_it_longer_than_64_chars_2";

        let short = backend.get_or_create_metric_table("test_metric").await.unwrap();
        assert_eq!(short.table_name, "test_metric");

        let table_1 = backend.get_or_create_metric_table(long_1).await.unwrap();
        assert_ne!(table_1.table_name, long_1);
        assert!(table_1.table_name.len() <= crate::backend::MAX_TABLE_NAME_LEN);

        // Stable on repeat
        for _ in 0..3 {
            assert_eq!(backend.get_or_create_metric_table(long_1).await.unwrap(), table_1);
        }

        let table_2 = backend.get_or_create_metric_table(long_2).await.unwrap();
        assert_ne!(table_1.id, table_2.id);
        assert_ne!(table_1.table_name, table_2.table_name);
        assert_eq!(backend.catalog_stats().await.unwrap().metrics, 3);
    }

    #[tokio::test]
    async fn test_metric_names_differing_in_case_get_separate_tables() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let row = |series_id| SampleRow {
            series_id,
            timestamp: 1000,
            value: 1.0,
        };

        let lower = backend.get_or_create_metric_table("up").await.unwrap();
        let upper = backend.get_or_create_metric_table("Up").await.unwrap();
        assert_eq!(lower.table_name, "up");
        assert!(!upper.table_name.eq_ignore_ascii_case(&lower.table_name));

        backend.insert_rows(&lower, &[row(1)]).await.unwrap();
        backend.insert_rows(&upper, &[row(2), row(2)]).await.unwrap();
        assert_eq!(backend.row_count("up").await.unwrap(), 1);
        assert_eq!(backend.row_count("Up").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_metric_name_matching_an_index_name() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        backend.get_or_create_metric_table("x").await.unwrap();
        for name in ["x_series_id_time_idx", "idx_data_x", "data_x"] {
            let table = backend.get_or_create_metric_table(name).await.unwrap();
            backend
                .insert_rows(
                    &table,
                    &[SampleRow {
                        series_id: 1,
                        timestamp: 1000,
                        value: 1.0,
                    }],
                )
                .await
                .unwrap();
            assert_eq!(backend.row_count(name).await.unwrap(), 1);
        }
        assert_eq!(backend.row_count("x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_rows_and_count() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let table = backend.get_or_create_metric_table("up").await.unwrap();

        let rows = vec![
            SampleRow {
                series_id: 1,
                timestamp: 1000,
                value: 1.0,
            },
            // Duplicates are stored as separate rows
            SampleRow {
                series_id: 1,
                timestamp: 1000,
                value: 1.0,
            },
            SampleRow {
                series_id: 2,
                timestamp: 1000,
                value: f64::NAN,
            },
        ];

        assert_eq!(backend.insert_rows(&table, &rows).await.unwrap(), 3);
        assert_eq!(backend.insert_rows(&table, &[]).await.unwrap(), 0);
        assert_eq!(backend.row_count("up").await.unwrap(), 3);

        assert!(matches!(
            backend.row_count("missing").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_series_labels_roundtrip() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        let labels = vec![
            Label::metric_name("up"),
            Label::new("instance", "a:9100"),
            Label::new("job", "node"),
        ];

        let label_ids = backend.get_or_create_label_ids(&labels).await.unwrap();
        let series_id = backend.get_or_create_series_id("up", &label_ids).await.unwrap();

        assert_eq!(backend.series_labels(series_id).await.unwrap(), labels);
        assert!(matches!(
            backend.series_labels(series_id + 100).await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_key_value_arrays_resolve_the_ingested_series() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());
        fn strings(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        let set = LabelSet::from_labels(&[
            Label::metric_name("up"),
            Label::new("job", "node"),
            Label::new("instance", "a:9100"),
        ]);
        let label_ids = backend.get_or_create_label_ids(set.labels()).await.unwrap();
        let series_id = backend.get_or_create_series_id("up", &label_ids).await.unwrap();

        // Key order and empty values do not matter
        let keys = strings(&["job", "instance", "env"]);
        let values = strings(&["node", "a:9100", ""]);

        assert_eq!(
            backend
                .label_ids_for_key_values("up", &keys, &values)
                .await
                .unwrap(),
            label_ids
        );
        assert_eq!(
            backend
                .series_id_for_key_values("up", &keys, &values)
                .await
                .unwrap(),
            series_id
        );
        assert_eq!(
            backend.series_labels(series_id).await.unwrap(),
            set.labels().to_vec()
        );
        assert_eq!(backend.catalog_stats().await.unwrap().series, 1);

        // A new combination creates a new series
        let other = backend
            .series_id_for_key_values("up", &strings(&["job"]), &strings(&["api"]))
            .await
            .unwrap();
        assert_ne!(other, series_id);

        assert!(matches!(
            backend
                .series_id_for_key_values("up", &strings(&["job"]), &[])
                .await,
            Err(BackendError::KeyValueMismatch { keys: 1, values: 0 })
        ));
    }

    #[tokio::test]
    async fn test_chunk_intervals() {
        let dir = tempdir().unwrap();
        let backend = open(dir.path());

        assert_eq!(backend.default_chunk_interval().await.unwrap(), 8 * HOUR);
        assert_eq!(backend.chunk_interval("unknown").await.unwrap(), 8 * HOUR);

        // Setting an interval creates the metric
        let table = backend.set_metric_chunk_interval("cpu", HOUR).await.unwrap();
        assert_eq!(table.table_name, "cpu");
        assert_eq!(backend.chunk_interval("cpu").await.unwrap(), HOUR);

        backend.get_or_create_metric_table("mem").await.unwrap();
        backend.set_default_chunk_interval(2 * HOUR).await.unwrap();
        assert_eq!(backend.chunk_interval("mem").await.unwrap(), 2 * HOUR);
        assert_eq!(backend.chunk_interval("cpu").await.unwrap(), HOUR);

        let metrics = backend.list_metrics().await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].metric_name, "cpu");
        assert_eq!(metrics[0].chunk_interval, Some(HOUR));
        assert_eq!(metrics[1].chunk_interval, None);

        backend.reset_metric_chunk_interval("cpu").await.unwrap();
        assert_eq!(backend.chunk_interval("cpu").await.unwrap(), 2 * HOUR);

        assert!(matches!(
            backend.reset_metric_chunk_interval("unknown").await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            backend.set_default_chunk_interval(Duration::ZERO).await,
            Err(BackendError::InvalidChunkInterval(_))
        ));
    }

    #[tokio::test]
    async fn test_default_chunk_interval_from_config() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            default_chunk_interval_secs: Some(3600),
            ..test_config(dir.path())
        };

        let backend = SqliteBackend::open(&config).unwrap();
        assert_eq!(backend.default_chunk_interval().await.unwrap(), HOUR);
    }
}
