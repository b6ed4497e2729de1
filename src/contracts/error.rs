use std::sync::PoisonError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContractorError {
    #[error("Counter error: {0}")]
    Counter(#[from] CounterError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

/// A mutex or rwlock was poisoned by a panicking holder.
#[derive(Error, Debug)]
#[error("Lock poisoned: {0}")]
pub struct LockPoisoned(pub String);

/// Extension trait for converting lock errors into [`LockPoisoned`].
///
/// The result converts into [`CounterError`] or [`StorageError`] through `?`.
pub trait LockResultExt<T> {
    fn map_lock_err(self) -> Result<T, LockPoisoned>;
}

impl<G> LockResultExt<G> for Result<G, PoisonError<G>> {
    #[inline]
    fn map_lock_err(self) -> Result<G, LockPoisoned> {
        self.map_err(|e| LockPoisoned(e.to_string()))
    }
}

/// Errors raised by counter stores.
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt counter {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Invalid scope key: {0}")]
    InvalidKey(String),

    #[error("Counter overflow for {0}")]
    Overflow(String),

    /// Configuration names a backend that does not exist.
    #[error("Unknown counter backend {0:?} (expected rocksdb, sqlite, memory or file)")]
    UnknownBackend(String),

    #[error(transparent)]
    LockPoisoned(#[from] LockPoisoned),
}

/// Errors raised while allocating contract numbers.
#[derive(Error, Debug)]
pub enum AllocationError {
    /// The counter store cannot be reached or written.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Configuration names a scope policy that does not exist.
    #[error("Invalid scope policy: {0:?} (expected \"global\" or \"per_day\")")]
    InvalidScopePolicy(String),

    #[error("Invalid wrap bound: {0} (expected 1..=999)")]
    InvalidWrapBound(String),

    /// The scope counter reached the largest value its store can hold.
    #[error("Counter exhausted: {0}")]
    CounterExhausted(String),
}

impl From<CounterError> for AllocationError {
    fn from(e: CounterError) -> Self {
        match e {
            CounterError::Overflow(_) => AllocationError::CounterExhausted(e.to_string()),
            other => AllocationError::PersistenceUnavailable(other.to_string()),
        }
    }
}

/// Errors raised by blob stores.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    LockPoisoned(#[from] LockPoisoned),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Errors raised by document converters.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion is not configured")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Conversion service rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Conversion failed: {0}")]
    Failed(String),

    #[error("Conversion did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid response from conversion service: {0}")]
    InvalidResponse(String),

    #[error("Failed to store converted document: {0}")]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for ConversionError {
    fn from(e: reqwest::Error) -> Self {
        ConversionError::Http(e.to_string())
    }
}

/// Errors raised while validating requests and rendering templates.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Invalid field {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Template error: {0}")]
    Template(String),
}
