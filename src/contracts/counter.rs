use serde::Serialize;

use crate::contracts::error::CounterError;

/// Maximum length of a scope key.
pub const MAX_SCOPE_KEY_LEN: usize = 128;

/// Persistent integer counters keyed by scope.
///
/// # Invariants
/// - The value for a key never decreases.
/// - `increment` creates the counter at 0 if absent and bumps it in one
///   indivisible step: concurrent callers never observe the same value.
/// - For persistent backends, a value returned by `increment` is durable
///   (synced to disk) before the call returns.
pub trait CounterStore: Send + Sync {
    /// Creates the counter at 0 if needed, increments it and returns the new value.
    fn increment(&self, scope_key: &str) -> Result<u64, CounterError>;

    /// Returns the current value, or `None` if the counter was never created.
    fn current(&self, scope_key: &str) -> Result<Option<u64>, CounterError>;

    /// Creates the counter with `value` if it does not exist yet.
    /// Never overwrites. Returns true if the counter was created.
    fn seed(&self, scope_key: &str, value: u64) -> Result<bool, CounterError>;

    /// Lists every counter held by the store, ordered by key.
    fn records(&self) -> Result<Vec<CounterRecord>, CounterError>;

    /// Short backend identifier for logs and status output.
    fn backend_name(&self) -> &'static str;
}

/// Persisted state for one scope key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterRecord {
    pub scope_key: String,
    pub value: u64,
}

/// Checks that a scope key is safe to use as a file name or database key.
pub fn validate_scope_key(key: &str) -> Result<(), CounterError> {
    if key.is_empty() || key.len() > MAX_SCOPE_KEY_LEN {
        return Err(CounterError::InvalidKey(format!(
            "length must be 1..={} (got {})",
            MAX_SCOPE_KEY_LEN,
            key.len()
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CounterError::InvalidKey(key.to_string()));
    }
    Ok(())
}
