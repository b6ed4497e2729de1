use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::contracts::{validate_scope_key, CounterError, CounterRecord, CounterStore, LockResultExt};

const COUNTER_EXTENSION: &str = "counter";

/// Flat-file counter store: one decimal file per scope key.
///
/// Increments are serialised by an in-process mutex only. Two processes
/// pointing at the same directory can hand out the same value, so this store
/// is meant as a degraded fallback, not as the authoritative backend.
pub struct FileCounterStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileCounterStore {
    /// Opens (and creates) the counter directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CounterError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CounterError::Unavailable(e.to_string()))?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scope_key: &str) -> Result<PathBuf, CounterError> {
        validate_scope_key(scope_key)?;
        Ok(self
            .dir
            .join(format!("{}.{}", scope_key, COUNTER_EXTENSION)))
    }

    fn read_value(scope_key: &str, path: &Path) -> Result<Option<u64>, CounterError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => contents
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| CounterError::Corrupt {
                    key: scope_key.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CounterError::Unavailable(e.to_string())),
        }
    }

    /// Writes through a synced temp file and rename so readers never see a
    /// torn value and the new value survives a crash.
    fn write_value(&self, path: &Path, value: u64) -> Result<(), CounterError> {
        let tmp = path.with_extension("counter.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(value.to_string().as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)?;
            self.sync_dir()
        };
        write().map_err(|e| CounterError::Unavailable(e.to_string()))
    }

    /// Persists the rename itself.
    #[cfg(unix)]
    fn sync_dir(&self) -> std::io::Result<()> {
        File::open(&self.dir)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CounterStore for FileCounterStore {
    fn increment(&self, scope_key: &str) -> Result<u64, CounterError> {
        let path = self.path_for(scope_key)?;
        let _guard = self.lock.lock().map_lock_err()?;

        let current = Self::read_value(scope_key, &path)?.unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or_else(|| CounterError::Overflow(scope_key.to_string()))?;
        self.write_value(&path, next)?;
        Ok(next)
    }

    fn current(&self, scope_key: &str) -> Result<Option<u64>, CounterError> {
        let path = self.path_for(scope_key)?;
        Self::read_value(scope_key, &path)
    }

    fn seed(&self, scope_key: &str, value: u64) -> Result<bool, CounterError> {
        let path = self.path_for(scope_key)?;
        let _guard = self.lock.lock().map_lock_err()?;

        if Self::read_value(scope_key, &path)?.is_some() {
            return Ok(false);
        }
        self.write_value(&path, value)?;
        Ok(true)
    }

    fn records(&self) -> Result<Vec<CounterRecord>, CounterError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| CounterError::Unavailable(e.to_string()))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CounterError::Unavailable(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(COUNTER_EXTENSION) {
                continue;
            }
            let Some(scope_key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(value) = Self::read_value(scope_key, &path)? {
                records.push(CounterRecord {
                    scope_key: scope_key.to_string(),
                    value,
                });
            }
        }
        records.sort_by(|a, b| a.scope_key.cmp(&b.scope_key));
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn persistence_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileCounterStore::open(dir.path()).unwrap();
            for _ in 0..10 {
                store.increment("contract_counter_global").unwrap();
            }
        }
        let store = FileCounterStore::open(dir.path()).unwrap();
        assert_eq!(store.current("contract_counter_global").unwrap(), Some(10));
        assert_eq!(store.increment("contract_counter_global").unwrap(), 11);
    }

    #[test]
    fn writes_leave_only_the_counter_file() {
        let dir = TempDir::new().unwrap();
        let store = FileCounterStore::open(dir.path()).unwrap();
        assert!(store.seed("contract_counter_20250923", 7).unwrap());
        assert_eq!(store.increment("contract_counter_20250923").unwrap(), 8);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["contract_counter_20250923.counter".to_string()]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("contract_counter_20250923.counter")).unwrap(),
            "8"
        );
    }

    #[test]
    fn stale_temp_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("k.counter"), "3").unwrap();
        // Left behind by a crash between write and rename
        std::fs::write(dir.path().join("k.counter.tmp"), "99").unwrap();

        let store = FileCounterStore::open(dir.path()).unwrap();
        assert_eq!(store.current("k").unwrap(), Some(3));
        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(store.increment("k").unwrap(), 4);
        assert!(!dir.path().join("k.counter.tmp").exists());
    }

    #[test]
    fn rejects_unsafe_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileCounterStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.increment("../escape"),
            Err(CounterError::InvalidKey(_))
        ));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("k.counter"), "not a number").unwrap();
        let store = FileCounterStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.increment("k"),
            Err(CounterError::Corrupt { .. })
        ));
    }

    #[test]
    fn records_skip_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCounterStore::open(dir.path()).unwrap();
        store.increment("a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let records = store.records().unwrap();
        assert_eq!(
            records,
            vec![CounterRecord {
                scope_key: "a".into(),
                value: 1
            }]
        );
    }
}
