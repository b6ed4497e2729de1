//! Remembers issued contracts so a client resubmitting the same data gets
//! the same contract back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default retention for issued contracts.
pub const DEFAULT_ISSUED_TTL_DAYS: i64 = 30;

/// A generated contract as returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedContract {
    pub contract_number: String,
    pub filename: String,
    pub contract_url: String,
    pub pdf_url: Option<String>,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

/// In-memory map from client fingerprint to the contract issued for it.
pub struct IssuedContracts {
    entries: DashMap<String, IssuedContract>,
    /// One lock per fingerprint currently being generated.
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    ttl: chrono::Duration,
}

impl Default for IssuedContracts {
    fn default() -> Self {
        Self::new(chrono::Duration::days(DEFAULT_ISSUED_TTL_DAYS))
    }
}

impl IssuedContracts {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            ttl,
        }
    }

    /// Returns the live entry for `fingerprint`, dropping it if expired.
    pub fn get(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<IssuedContract> {
        {
            let entry = self.entries.get(fingerprint)?;
            if now - entry.created_at < self.ttl {
                return Some(entry.clone());
            }
        }
        self.entries
            .remove_if(fingerprint, |_, c| now - c.created_at >= self.ttl);
        None
    }

    /// Serialises generation for one client. Hold the guard from the cache
    /// lookup until the new contract is inserted, so identical concurrent
    /// submissions wait and then find the first one's contract.
    pub async fn lock(&self, fingerprint: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let entry = self.in_flight.entry(fingerprint.to_string()).or_default();
            Arc::clone(entry.value())
        };
        lock.lock_owned().await
    }

    pub fn insert(&self, fingerprint: String, contract: IssuedContract) {
        self.entries.insert(fingerprint, contract);
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        // Locks nobody holds or waits on
        self.in_flight.retain(|_, lock| Arc::strong_count(lock) > 1);

        let before = self.entries.len();
        self.entries.retain(|_, c| now - c.created_at < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
