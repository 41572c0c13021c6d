//! SQLite store backend.
//!
//! One `samples` table keyed by `(identity, seq)`; `seq` is the 0-based
//! position within the identity's log and stays dense, so log length is
//! `COUNT(*)` and range reads are index scans. All SQLite calls run inside
//! `spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, params};
use tracing::debug;

use super::{SampleLogStore, StoreBackendKind, resolve_range};
use crate::error::StoreError;
use crate::sample::Sample;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS samples (
    identity       TEXT    NOT NULL,
    seq            INTEGER NOT NULL,
    value          REAL    NOT NULL,
    recorded_at_ms INTEGER NOT NULL,
    PRIMARY KEY (identity, seq)
) WITHOUT ROWID;
";

/// Sample logs persisted in a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::with_schema(conn)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// All identities with at least one stored sample.
    pub async fn identities(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT identity FROM samples ORDER BY identity")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}

fn count_sync(conn: &Connection, identity: &str) -> Result<u64, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM samples WHERE identity = ?1",
        [identity],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

impl SampleLogStore for SqliteLogStore {
    fn backend_kind(&self) -> StoreBackendKind {
        StoreBackendKind::Sqlite
    }

    async fn append(&self, identity: &str, sample: &Sample) -> Result<u64, StoreError> {
        let identity = identity.to_string();
        let value = sample.value;
        let recorded_at_ms = sample.timestamp_ms();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let seq = count_sync(&tx, &identity)?;
            tx.execute(
                "INSERT INTO samples (identity, seq, value, recorded_at_ms) VALUES (?1, ?2, ?3, ?4)",
                params![identity, seq as i64, value, recorded_at_ms],
            )?;
            tx.commit()?;
            Ok(seq + 1)
        })
        .await
    }

    async fn read_range(
        &self,
        identity: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Sample>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            let len = count_sync(conn, &identity)?;
            let Some(range) = resolve_range(len, start, end) else {
                return Ok(Vec::new());
            };
            let mut stmt = conn.prepare(
                "SELECT seq, value, recorded_at_ms FROM samples
                 WHERE identity = ?1 AND seq >= ?2 AND seq < ?3
                 ORDER BY seq",
            )?;
            let rows = stmt.query_map(
                params![identity, range.start as i64, range.end as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )?;
            let mut samples = Vec::with_capacity((range.end - range.start) as usize);
            for row in rows {
                let (seq, value, recorded_at_ms) = row?;
                let sample = Sample::from_parts(identity.as_str(), value, recorded_at_ms)
                    .ok_or_else(|| StoreError::Corruption {
                        identity: identity.clone(),
                        details: format!("seq {seq}: timestamp {recorded_at_ms} out of range"),
                    })?;
                samples.push(sample);
            }
            Ok(samples)
        })
        .await
    }

    async fn len(&self, identity: &str) -> Result<u64, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| Ok(count_sync(conn, &identity)?))
            .await
    }

    async fn rename(&self, old: &str, new: &str) -> Result<u64, StoreError> {
        let old = old.to_string();
        let new = new.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let dest_len = count_sync(&tx, &new)?;
            if old == new {
                return Ok(dest_len);
            }
            let moved = tx.execute(
                "UPDATE samples SET identity = ?1, seq = seq + ?2 WHERE identity = ?3",
                params![new, dest_len as i64, old],
            )?;
            tx.commit()?;
            debug!(
                old_identity = %old,
                new_identity = %new,
                moved,
                "sqlite log re-keyed"
            );
            Ok(dest_len + moved as u64)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM samples", [])?;
            Ok(())
        })
        .await
    }
}
