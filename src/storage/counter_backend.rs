//! Unified counter store that dispatches to the configured backend.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::contracts::{CounterError, CounterRecord, CounterStore};
use crate::storage::{FileCounterStore, MemoryCounterStore, RocksDbCounterStore, SqliteCounterStore};

/// Backend selector read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterBackendKind {
    Memory,
    RocksDb,
    Sqlite,
    File,
}

impl FromStr for CounterBackendKind {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" => Ok(Self::RocksDb),
            "sqlite" => Ok(Self::Sqlite),
            "file" => Ok(Self::File),
            other => Err(CounterError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for CounterBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::RocksDb => "rocksdb",
            Self::Sqlite => "sqlite",
            Self::File => "file",
        })
    }
}

/// Counter store backed by one of the supported engines.
pub enum CounterBackend {
    Memory(MemoryCounterStore),
    RocksDb(RocksDbCounterStore),
    Sqlite(SqliteCounterStore),
    File(FileCounterStore),
}

impl CounterBackend {
    /// Opens the selected backend under `data_dir`.
    ///
    /// Layout: `counters/` (rocksdb), `counters.db` (sqlite), `counters-file/` (file).
    pub fn open(kind: CounterBackendKind, data_dir: impl AsRef<Path>) -> Result<Self, CounterError> {
        let data_dir = data_dir.as_ref();
        Ok(match kind {
            CounterBackendKind::Memory => Self::Memory(MemoryCounterStore::new()),
            CounterBackendKind::RocksDb => {
                Self::RocksDb(RocksDbCounterStore::open(data_dir.join("counters"))?)
            }
            CounterBackendKind::Sqlite => {
                Self::Sqlite(SqliteCounterStore::open(data_dir.join("counters.db"))?)
            }
            CounterBackendKind::File => {
                Self::File(FileCounterStore::open(data_dir.join("counters-file"))?)
            }
        })
    }

    pub fn kind(&self) -> CounterBackendKind {
        match self {
            Self::Memory(_) => CounterBackendKind::Memory,
            Self::RocksDb(_) => CounterBackendKind::RocksDb,
            Self::Sqlite(_) => CounterBackendKind::Sqlite,
            Self::File(_) => CounterBackendKind::File,
        }
    }
}

impl CounterStore for CounterBackend {
    fn increment(&self, scope_key: &str) -> Result<u64, CounterError> {
        match self {
            Self::Memory(s) => s.increment(scope_key),
            Self::RocksDb(s) => s.increment(scope_key),
            Self::Sqlite(s) => s.increment(scope_key),
            Self::File(s) => s.increment(scope_key),
        }
    }

    fn current(&self, scope_key: &str) -> Result<Option<u64>, CounterError> {
        match self {
            Self::Memory(s) => s.current(scope_key),
            Self::RocksDb(s) => s.current(scope_key),
            Self::Sqlite(s) => s.current(scope_key),
            Self::File(s) => s.current(scope_key),
        }
    }

    fn seed(&self, scope_key: &str, value: u64) -> Result<bool, CounterError> {
        match self {
            Self::Memory(s) => s.seed(scope_key, value),
            Self::RocksDb(s) => s.seed(scope_key, value),
            Self::Sqlite(s) => s.seed(scope_key, value),
            Self::File(s) => s.seed(scope_key, value),
        }
    }

    fn records(&self) -> Result<Vec<CounterRecord>, CounterError> {
        match self {
            Self::Memory(s) => s.records(),
            Self::RocksDb(s) => s.records(),
            Self::Sqlite(s) => s.records(),
            Self::File(s) => s.records(),
        }
    }

    fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(s) => s.backend_name(),
            Self::RocksDb(s) => s.backend_name(),
            Self::Sqlite(s) => s.backend_name(),
            Self::File(s) => s.backend_name(),
        }
    }
}
