//! Catalog schema and version gate
//!
//! The schema version lives in a one-row `schema_migrations` table next to
//! a `dirty` flag. Migrations run under one `BEGIN IMMEDIATE` write lock,
//! so concurrent openers queue on the busy timeout and then find the work
//! done. A migration whose DDL fails is rolled back and its target version
//! recorded as dirty; the backend refuses to start until someone repairs it.

use crate::backend::{BackendResult, SchemaError};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Version this build reads and writes
pub const SCHEMA_VERSION: i64 = 1;

/// Default chunk interval: 8 hours
pub const DEFAULT_CHUNK_INTERVAL_MS: i64 = 8 * 3600 * 1000;

const CREATE_MIGRATIONS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER NOT NULL,
        dirty INTEGER NOT NULL
    )";

const V1_CATALOG: &str = "
    CREATE TABLE label (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE (name, value)
    );

    CREATE TABLE metric (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        metric_name TEXT NOT NULL UNIQUE,
        table_name TEXT UNIQUE COLLATE NOCASE,
        chunk_interval_ms INTEGER
    );

    CREATE TABLE series (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        metric_name TEXT NOT NULL,
        labels TEXT NOT NULL,
        UNIQUE (metric_name, labels)
    );

    CREATE TABLE default_setting (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    INSERT INTO default_setting (key, value) VALUES ('chunk_interval_ms', 28800000);
";

/// Ordered migrations: (target version, DDL)
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_CATALOG)];

/// Recorded schema state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaState {
    pub version: i64,
    pub dirty: bool,
}

/// Read the recorded schema state, `None` if nothing was ever applied
///
/// Never writes, so it is safe on a database nobody migrated yet.
pub fn schema_state(conn: &Connection) -> BackendResult<Option<SchemaState>> {
    let tracked: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master
                        WHERE type = 'table' AND name = 'schema_migrations')",
        [],
        |row| row.get(0),
    )?;
    if !tracked {
        return Ok(None);
    }

    let state = conn
        .query_row(
            "SELECT version, dirty FROM schema_migrations LIMIT 1",
            [],
            |row| {
                Ok(SchemaState {
                    version: row.get(0)?,
                    dirty: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(state)
}

fn record_state(conn: &Connection, version: i64, dirty: bool) -> BackendResult<()> {
    conn.execute("DELETE FROM schema_migrations", [])?;
    conn.execute(
        "INSERT INTO schema_migrations (version, dirty) VALUES (?, ?)",
        params![version, dirty],
    )?;
    Ok(())
}

/// Bring the schema up to [`SCHEMA_VERSION`]
///
/// Returns the version the schema is at afterwards.
pub fn migrate(conn: &mut Connection) -> BackendResult<i64> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(CREATE_MIGRATIONS_TABLE)?;

    // Read under the write lock so a concurrent opener's migration is seen whole
    let state = schema_state(&tx)?.unwrap_or(SchemaState {
        version: 0,
        dirty: false,
    });

    if state.dirty {
        return Err(SchemaError::Dirty(state.version).into());
    }
    if state.version > SCHEMA_VERSION {
        return Err(SchemaError::UnexpectedVersion {
            found: state.version,
            expected: SCHEMA_VERSION,
        }
        .into());
    }

    let mut version = state.version;
    for &(target, ddl) in MIGRATIONS.iter().filter(|(v, _)| *v > state.version) {
        let applied = tx.savepoint().and_then(|sp| {
            sp.execute_batch(ddl)?;
            sp.commit()
        });
        if let Err(e) = applied {
            // The savepoint rolled back on drop; keep only the flag
            record_state(&tx, target, true)?;
            tx.commit()?;
            tracing::error!("Schema migration {} failed: {}", target, e);
            return Err(e.into());
        }

        record_state(&tx, target, false)?;
        tracing::info!("Applied schema migration {}", target);
        version = target;
    }

    tx.commit()?;
    Ok(version)
}

/// Refuse to operate on a dirty or foreign schema
pub fn check_schema(conn: &Connection) -> BackendResult<()> {
    match schema_state(conn)? {
        None => Err(SchemaError::Uninitialized.into()),
        Some(state) if state.dirty => Err(SchemaError::Dirty(state.version).into()),
        Some(state) if state.version != SCHEMA_VERSION => Err(SchemaError::UnexpectedVersion {
            found: state.version,
            expected: SCHEMA_VERSION,
        }
        .into()),
        Some(_) => Ok(()),
    }
}
