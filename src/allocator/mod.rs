//! Contract-number allocation.
//!
//! A [`SequenceAllocator`] turns one atomic counter increment into a
//! `YYYYMMDD-NNN` contract number. It never retries and never falls back;
//! [`NumberIssuer`] layers the fallback policy on top.

mod clock;
mod issuer;

use std::sync::Arc;

pub use clock::{Clock, FixedClock, SystemClock};
pub use issuer::{IssuedNumber, NumberIssuer};

use crate::contracts::{
    AllocationError, ContractNumber, CounterRecord, CounterStore, ScopePolicy, WrapBound,
};

/// Allocation settings, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Scope used by [`SequenceAllocator::next_number`].
    pub scope_policy: ScopePolicy,
    pub wrap_bound: WrapBound,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            scope_policy: ScopePolicy::PerDay,
            wrap_bound: WrapBound::default(),
        }
    }
}

impl AllocatorConfig {
    /// Creates a config from environment variables.
    ///
    /// Reads:
    /// - `CONTRACTOR_SCOPE_POLICY`: `per_day` or `global` (default: `per_day`)
    /// - `CONTRACTOR_WRAP_BOUND`: cycle length, 1..=999 (default: 999)
    ///
    /// Unlike the other `from_env` constructors, invalid values are errors:
    /// a misconfigured numbering scheme must not start silently.
    pub fn from_env() -> Result<Self, AllocationError> {
        let default = Self::default();

        let scope_policy = match std::env::var("CONTRACTOR_SCOPE_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => default.scope_policy,
        };
        let wrap_bound = match std::env::var("CONTRACTOR_WRAP_BOUND") {
            Ok(v) => v.parse()?,
            Err(_) => default.wrap_bound,
        };

        Ok(Self {
            scope_policy,
            wrap_bound,
        })
    }
}

/// Issues contract numbers from a persistent counter store.
pub struct SequenceAllocator<S: CounterStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: AllocatorConfig,
}

impl<S: CounterStore> SequenceAllocator<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: AllocatorConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Creates an allocator that dates numbers with the host's local date.
    pub fn with_system_clock(store: Arc<S>, config: AllocatorConfig) -> Self {
        Self::new(store, Arc::new(SystemClock), config)
    }

    /// Allocates the next number in the given scope.
    ///
    /// The counter for the scope is created at 0 on first use and bumped in
    /// one atomic step, so concurrent callers get distinct values. The date
    /// part is always today's date, also under [`ScopePolicy::Global`].
    pub fn allocate(&self, policy: ScopePolicy) -> Result<ContractNumber, AllocationError> {
        let today = self.clock.today();
        let scope_key = policy.scope_key(today);

        let value = self.store.increment(&scope_key).map_err(|e| {
            tracing::error!(
                scope_key = %scope_key,
                backend = self.store.backend_name(),
                error = %e,
                "Counter increment failed"
            );
            AllocationError::from(e)
        })?;

        let sequence = self.config.wrap_bound.sequence_for(value);
        let number = ContractNumber::new(today, sequence, scope_key, value);

        if number.is_wrap() {
            tracing::warn!(
                scope_key = %number.scope_key,
                counter_value = value,
                wrap_bound = self.config.wrap_bound.get(),
                "Contract sequence wrapped; numbers in this scope now repeat"
            );
        }

        tracing::debug!(
            contract_number = %number,
            scope_key = %number.scope_key,
            counter_value = value,
            "Allocated contract number"
        );

        Ok(number)
    }

    /// Allocates with the configured scope policy.
    pub fn next_number(&self) -> Result<ContractNumber, AllocationError> {
        self.allocate(self.config.scope_policy)
    }

    /// Scope key the configured policy resolves to today.
    pub fn current_scope_key(&self) -> String {
        self.config.scope_policy.scope_key(self.clock.today())
    }

    /// Current raw counter value for today's configured scope.
    pub fn current_value(&self) -> Result<Option<u64>, AllocationError> {
        self.value_of(&self.current_scope_key())
    }

    /// Current raw counter value for any scope key.
    pub fn value_of(&self, scope_key: &str) -> Result<Option<u64>, AllocationError> {
        Ok(self.store.current(scope_key)?)
    }

    /// Creates the counter for `scope_key` at `value` unless it already exists.
    pub fn seed(&self, scope_key: &str, value: u64) -> Result<bool, AllocationError> {
        let created = self.store.seed(scope_key, value)?;
        if created {
            tracing::info!(scope_key = %scope_key, value = value, "Seeded contract counter");
        } else {
            tracing::info!(scope_key = %scope_key, "Contract counter already exists, seed ignored");
        }
        Ok(created)
    }

    pub fn records(&self) -> Result<Vec<CounterRecord>, AllocationError> {
        Ok(self.store.records()?)
    }

    pub fn config(&self) -> AllocatorConfig {
        self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }
}
