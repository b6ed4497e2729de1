use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::contracts::{CounterError, CounterRecord, CounterStore};

/// In-process counter store.
///
/// Counters live only as long as the process; intended for tests and
/// single-instance deployments that do not need numbering to survive restarts.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, AtomicU64>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(&self, scope_key: &str) -> Result<u64, CounterError> {
        // Fast path: counter already exists, only a shard read lock is taken
        if let Some(counter) = self.counters.get(scope_key) {
            return bump(&counter, scope_key);
        }
        // Slow path: entry() holds the shard write lock, so exactly one caller creates it
        let counter = self
            .counters
            .entry(scope_key.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        bump(&counter, scope_key)
    }

    fn current(&self, scope_key: &str) -> Result<Option<u64>, CounterError> {
        Ok(self
            .counters
            .get(scope_key)
            .map(|c| c.load(Ordering::SeqCst)))
    }

    fn seed(&self, scope_key: &str, value: u64) -> Result<bool, CounterError> {
        match self.counters.entry(scope_key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(AtomicU64::new(value));
                Ok(true)
            }
        }
    }

    fn records(&self) -> Result<Vec<CounterRecord>, CounterError> {
        let mut records: Vec<CounterRecord> = self
            .counters
            .iter()
            .map(|entry| CounterRecord {
                scope_key: entry.key().clone(),
                value: entry.value().load(Ordering::SeqCst),
            })
            .collect();
        records.sort_by(|a, b| a.scope_key.cmp(&b.scope_key));
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn bump(counter: &AtomicU64, scope_key: &str) -> Result<u64, CounterError> {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
        .map(|prev| prev + 1)
        .map_err(|_| CounterError::Overflow(scope_key.to_string()))
}
