//! SQLite connection pool
//!
//! A fixed set of connections to one database file, handed out
//! round-robin. A caller first scans for an idle connection and only
//! blocks on its round-robin slot when every connection is busy.
//!
//! ```text
//!            cursor ──┐
//!                     ▼
//!   ┌────────┬────────┬────────┬────────┐
//!   │ conn 0 │ conn 1 │ conn 2 │ conn 3 │   Mutex<Connection> each
//!   └────────┴────────┴────────┴────────┘
//! ```

use crate::backend::{BackendError, BackendResult};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// Round-robin pool of SQLite connections
pub struct ConnectionPool {
    connections: Vec<Mutex<Connection>>,
    cursor: AtomicUsize,
    path: PathBuf,
}

impl ConnectionPool {
    /// Open `size` connections to the database at `path`
    ///
    /// The parent directory is created if needed. Every connection runs in
    /// WAL mode and waits up to `busy_timeout` for a competing writer.
    pub fn open(path: &Path, size: usize, busy_timeout: Duration) -> BackendResult<Self> {
        if size == 0 {
            return Err(BackendError::Pool("pool size must be at least 1".into()));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connections = (0..size)
            .map(|_| open_connection(path, busy_timeout).map(Mutex::new))
            .collect::<BackendResult<Vec<_>>>()?;

        tracing::debug!("Opened {} connections to {:?}", size, path);

        Ok(Self {
            connections,
            cursor: AtomicUsize::new(0),
            path: path.to_path_buf(),
        })
    }

    /// Run `f` on one pooled connection
    ///
    /// The connection is held only for the duration of `f`.
    pub fn with_connection<T, F>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&mut Connection) -> BackendResult<T>,
    {
        let mut guard = self.acquire()?;
        f(&mut guard)
    }

    fn acquire(&self) -> BackendResult<MutexGuard<'_, Connection>> {
        let len = self.connections.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            let index = (start + offset) % len;
            match self.connections[index].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(poisoned(index)),
            }
        }

        self.connections[start]
            .lock()
            .map_err(|_| poisoned(start))
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn poisoned(index: usize) -> BackendError {
    BackendError::Pool(format!("connection {} poisoned", index))
}

fn open_connection(path: &Path, busy_timeout: Duration) -> BackendResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = 10000;
        PRAGMA temp_store = MEMORY;
        ",
    )?;

    Ok(conn)
}
