use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rocksdb::{IteratorMode, Options, WriteBatch, WriteOptions, DB};

use crate::contracts::{CounterError, CounterRecord, CounterStore, LockResultExt};

/// RocksDB-backed counter store.
///
/// Keys are scope keys, values are big-endian `u64`. The database is opened
/// exclusively by this process, so serialising read-modify-write under
/// `write_lock` makes each increment atomic.
pub struct RocksDbCounterStore {
    db: DB,
    write_lock: Mutex<()>,
    path: PathBuf,
}

impl RocksDbCounterStore {
    /// Opens or creates a counter database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CounterError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        // Counters are tiny; a small write buffer keeps the footprint low
        opts.set_write_buffer_size(4 * 1024 * 1024);
        opts.set_max_write_buffer_number(2);
        opts.set_wal_dir(path.join("wal"));

        let db = DB::open(&opts, path).map_err(|e| CounterError::Unavailable(e.to_string()))?;

        tracing::info!(path = %path.display(), "Opened RocksDB counter store");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            path: path.to_path_buf(),
        })
    }

    /// Returns the database directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes are fsynced so an allocated number is never handed out twice after a crash.
    fn write_options() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }

    /// Parses a u64 from big-endian bytes.
    #[inline]
    fn parse_u64_be(key: &str, bytes: &[u8]) -> Result<u64, CounterError> {
        bytes
            .try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| CounterError::Corrupt {
                key: key.to_string(),
                reason: format!("expected 8 bytes, found {}", bytes.len()),
            })
    }

    #[inline]
    fn get_u64(&self, key: &str) -> Result<Option<u64>, CounterError> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(Self::parse_u64_be(key, &bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CounterError::Unavailable(e.to_string())),
        }
    }

    fn put_u64(&self, key: &str, value: u64) -> Result<(), CounterError> {
        let mut batch = WriteBatch::default();
        batch.put(key.as_bytes(), value.to_be_bytes());
        self.db
            .write_opt(batch, &Self::write_options())
            .map_err(|e| CounterError::Unavailable(e.to_string()))
    }
}

impl CounterStore for RocksDbCounterStore {
    fn increment(&self, scope_key: &str) -> Result<u64, CounterError> {
        let _guard = self.write_lock.lock().map_lock_err()?;

        let current = self.get_u64(scope_key)?.unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or_else(|| CounterError::Overflow(scope_key.to_string()))?;
        self.put_u64(scope_key, next)?;

        Ok(next)
    }

    fn current(&self, scope_key: &str) -> Result<Option<u64>, CounterError> {
        self.get_u64(scope_key)
    }

    fn seed(&self, scope_key: &str, value: u64) -> Result<bool, CounterError> {
        let _guard = self.write_lock.lock().map_lock_err()?;

        if self.get_u64(scope_key)?.is_some() {
            return Ok(false);
        }
        self.put_u64(scope_key, value)?;
        Ok(true)
    }

    fn records(&self) -> Result<Vec<CounterRecord>, CounterError> {
        let mut records = Vec::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, value) = item.map_err(|e| CounterError::Unavailable(e.to_string()))?;
            let scope_key = String::from_utf8_lossy(&key).into_owned();
            let value = Self::parse_u64_be(&scope_key, &value)?;
            records.push(CounterRecord { scope_key, value });
        }
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "rocksdb"
    }
}
