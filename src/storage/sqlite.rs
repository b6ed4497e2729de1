use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::contracts::{CounterError, CounterRecord, CounterStore, LockResultExt};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contract_counters (
    scope_key     TEXT PRIMARY KEY NOT NULL,
    value         INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
";

/// Largest value the `INTEGER` column holds before SQLite promotes to REAL.
const MAX_STORED: i64 = i64::MAX;

/// Increment-or-create in a single statement; SQLite serialises writers.
/// A row already at `MAX_STORED` is left alone and no row is returned.
const UPSERT_INCREMENT: &str = "
INSERT INTO contract_counters (scope_key, value, created_at_ms, updated_at_ms)
VALUES (?1, 1, ?2, ?2)
ON CONFLICT(scope_key) DO UPDATE SET
    value = value + 1,
    updated_at_ms = excluded.updated_at_ms
WHERE contract_counters.value < 9223372036854775807
RETURNING value
";

const INSERT_IF_ABSENT: &str = "
INSERT INTO contract_counters (scope_key, value, created_at_ms, updated_at_ms)
VALUES (?1, ?2, ?3, ?3)
ON CONFLICT(scope_key) DO NOTHING
";

/// SQLite-backed counter store using the `contract_counters` table.
///
/// Several processes may share the database file; atomicity comes from the
/// upsert statement rather than from the in-process mutex.
pub struct SqliteCounterStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteCounterStore {
    /// Opens or creates the counter database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CounterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CounterError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;

        tracing::info!(path = %path.display(), "Opened SQLite counter store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, CounterError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the database file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl CounterStore for SqliteCounterStore {
    fn increment(&self, scope_key: &str) -> Result<u64, CounterError> {
        let conn = self.conn.lock().map_lock_err()?;
        let value: Option<i64> = conn
            .query_row(UPSERT_INCREMENT, params![scope_key, now_ms()], |row| {
                row.get(0)
            })
            .optional()
            .map_err(sql_err)?;
        match value {
            Some(value) => to_u64(scope_key, value),
            None => Err(CounterError::Overflow(scope_key.to_string())),
        }
    }

    fn current(&self, scope_key: &str) -> Result<Option<u64>, CounterError> {
        let conn = self.conn.lock().map_lock_err()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM contract_counters WHERE scope_key = ?1",
                params![scope_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        value.map(|v| to_u64(scope_key, v)).transpose()
    }

    fn seed(&self, scope_key: &str, value: u64) -> Result<bool, CounterError> {
        let value = i64::try_from(value)
            .ok()
            .filter(|v| *v < MAX_STORED)
            .ok_or_else(|| CounterError::Overflow(scope_key.into()))?;
        let conn = self.conn.lock().map_lock_err()?;
        let inserted = conn
            .execute(INSERT_IF_ABSENT, params![scope_key, value, now_ms()])
            .map_err(sql_err)?;
        Ok(inserted == 1)
    }

    fn records(&self) -> Result<Vec<CounterRecord>, CounterError> {
        let conn = self.conn.lock().map_lock_err()?;
        let mut stmt = conn
            .prepare("SELECT scope_key, value FROM contract_counters ORDER BY scope_key")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(sql_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (scope_key, value) = row.map_err(sql_err)?;
            let value = to_u64(&scope_key, value)?;
            records.push(CounterRecord { scope_key, value });
        }
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

fn sql_err(e: rusqlite::Error) -> CounterError {
    CounterError::Unavailable(e.to_string())
}

fn to_u64(scope_key: &str, value: i64) -> Result<u64, CounterError> {
    u64::try_from(value).map_err(|_| CounterError::Corrupt {
        key: scope_key.to_string(),
        reason: format!("negative value {}", value),
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn upsert_starts_at_one() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        assert_eq!(store.current("k").unwrap(), None);
        assert_eq!(store.increment("k").unwrap(), 1);
        assert_eq!(store.increment("k").unwrap(), 2);
        assert_eq!(store.current("k").unwrap(), Some(2));
    }

    #[test]
    fn seed_then_increment() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        assert!(store.seed("contract_counter_20250923", 21).unwrap());
        assert!(!store.seed("contract_counter_20250923", 99).unwrap());
        assert_eq!(store.increment("contract_counter_20250923").unwrap(), 22);
    }

    #[test]
    fn two_connections_share_one_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counters.db");
        let a = Arc::new(SqliteCounterStore::open(&path).unwrap());
        let b = Arc::new(SqliteCounterStore::open(&path).unwrap());

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|store| {
                thread::spawn(move || {
                    (0..50)
                        .map(|_| store.increment("shared").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut values: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 100);
        assert_eq!(*values.last().unwrap(), 100);
    }

    #[test]
    fn seed_at_integer_limit_is_rejected() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        for value in [i64::MAX as u64, u64::MAX] {
            assert!(matches!(
                store.seed("k", value),
                Err(CounterError::Overflow(_))
            ));
        }
        assert_eq!(store.current("k").unwrap(), None);
    }

    #[test]
    fn overflow_is_reported() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        assert!(store.seed("k", (i64::MAX - 1) as u64).unwrap());
        assert_eq!(store.increment("k").unwrap(), i64::MAX as u64);

        for _ in 0..2 {
            assert!(matches!(
                store.increment("k"),
                Err(CounterError::Overflow(_))
            ));
        }
        // Row stays an integer and readable
        assert_eq!(store.current("k").unwrap(), Some(i64::MAX as u64));
        assert_eq!(store.records().unwrap()[0].value, i64::MAX as u64);
    }

    #[test]
    fn records_are_ordered() {
        let store = SqliteCounterStore::open_in_memory().unwrap();
        store.increment("b").unwrap();
        store.increment("a").unwrap();
        store.increment("a").unwrap();
        let records = store.records().unwrap();
        assert_eq!(records[0].scope_key, "a");
        assert_eq!(records[0].value, 2);
        assert_eq!(records[1].scope_key, "b");
    }
}
