use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::allocator::SequenceAllocator;
use crate::contracts::{AllocationError, ContractNumber, CounterStore};
use crate::metrics::AllocationMetrics;
use crate::storage::FileCounterStore;

/// A contract number plus where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedNumber {
    pub number: ContractNumber,
    /// True when the number came from the fallback store and may duplicate
    /// a number issued by the primary store.
    pub degraded: bool,
}

/// Caller-side allocation policy: primary store first, then an explicitly
/// configured fallback.
///
/// The fallback keeps its own counters and is never reconciled with the
/// primary store. Every fallback allocation is logged at `warn` and flagged
/// `degraded`.
pub struct NumberIssuer<S: CounterStore> {
    primary: SequenceAllocator<S>,
    fallback: Option<SequenceAllocator<FileCounterStore>>,
    metrics: Arc<AllocationMetrics>,
}

impl<S: CounterStore> NumberIssuer<S> {
    pub fn new(primary: SequenceAllocator<S>, metrics: Arc<AllocationMetrics>) -> Self {
        Self {
            primary,
            fallback: None,
            metrics,
        }
    }

    pub fn with_fallback(mut self, fallback: SequenceAllocator<FileCounterStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn primary(&self) -> &SequenceAllocator<S> {
        &self.primary
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Issues the next number using the configured scope policy.
    pub fn issue(&self) -> Result<IssuedNumber, AllocationError> {
        let start = Instant::now();

        match self.primary.next_number() {
            Ok(number) => {
                self.metrics
                    .record_allocation(start.elapsed().as_micros() as u64, number.is_wrap());
                Ok(IssuedNumber {
                    number,
                    degraded: false,
                })
            }
            Err(AllocationError::PersistenceUnavailable(reason)) => {
                self.metrics.record_failure();
                let Some(fallback) = &self.fallback else {
                    return Err(AllocationError::PersistenceUnavailable(reason));
                };

                let number = fallback.next_number()?;
                self.metrics.record_fallback();
                tracing::warn!(
                    degraded = true,
                    contract_number = %number,
                    primary_backend = self.primary.backend_name(),
                    reason = %reason,
                    "Primary counter store unavailable, issued number from fallback store"
                );
                Ok(IssuedNumber {
                    number,
                    degraded: true,
                })
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocatorConfig, Clock, FixedClock};
    use crate::contracts::{CounterError, CounterRecord};
    use crate::storage::MemoryCounterStore;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Memory store that can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryCounterStore,
        down: AtomicBool,
    }

    impl CounterStore for FlakyStore {
        fn increment(&self, key: &str) -> Result<u64, CounterError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CounterError::Unavailable("connection refused".into()));
            }
            self.inner.increment(key)
        }
        fn current(&self, key: &str) -> Result<Option<u64>, CounterError> {
            self.inner.current(key)
        }
        fn seed(&self, key: &str, value: u64) -> Result<bool, CounterError> {
            self.inner.seed(key, value)
        }
        fn records(&self) -> Result<Vec<CounterRecord>, CounterError> {
            self.inner.records()
        }
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2025, 9, 23).unwrap()))
    }

    #[test]
    fn primary_numbers_are_not_degraded() {
        let metrics = Arc::new(AllocationMetrics::default());
        let primary = SequenceAllocator::new(
            Arc::new(MemoryCounterStore::new()),
            clock(),
            AllocatorConfig::default(),
        );
        let issuer = NumberIssuer::new(primary, Arc::clone(&metrics));

        let issued = issuer.issue().unwrap();
        assert_eq!(issued.number.display, "20250923-001");
        assert!(!issued.degraded);
        assert_eq!(metrics.allocations_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn failure_without_fallback_propagates() {
        let metrics = Arc::new(AllocationMetrics::default());
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        let issuer = NumberIssuer::new(
            SequenceAllocator::new(store, clock(), AllocatorConfig::default()),
            Arc::clone(&metrics),
        );

        assert!(matches!(
            issuer.issue(),
            Err(AllocationError::PersistenceUnavailable(_))
        ));
        assert_eq!(metrics.failures_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn exhausted_counter_does_not_use_fallback() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(AllocationMetrics::default());
        let store = Arc::new(MemoryCounterStore::new());
        store.seed("contract_counter_20250923", u64::MAX).unwrap();
        let fallback = SequenceAllocator::new(
            Arc::new(FileCounterStore::open(dir.path()).unwrap()),
            clock(),
            AllocatorConfig::default(),
        );
        let issuer = NumberIssuer::new(
            SequenceAllocator::new(store, clock(), AllocatorConfig::default()),
            Arc::clone(&metrics),
        )
        .with_fallback(fallback);

        assert!(matches!(
            issuer.issue(),
            Err(AllocationError::CounterExhausted(_))
        ));
        assert_eq!(metrics.fallback_allocations_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.failures_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn failure_with_fallback_is_flagged_degraded() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(AllocationMetrics::default());
        let store = Arc::new(FlakyStore::default());
        let fallback = SequenceAllocator::new(
            Arc::new(FileCounterStore::open(dir.path()).unwrap()),
            clock(),
            AllocatorConfig::default(),
        );
        let issuer = NumberIssuer::new(
            SequenceAllocator::new(Arc::clone(&store), clock(), AllocatorConfig::default()),
            Arc::clone(&metrics),
        )
        .with_fallback(fallback);

        assert!(!issuer.issue().unwrap().degraded);

        store.down.store(true, Ordering::SeqCst);
        let issued = issuer.issue().unwrap();
        assert!(issued.degraded);
        // The fallback keeps its own counter, so it can repeat a primary number
        assert_eq!(issued.number.display, "20250923-001");
        assert_eq!(metrics.fallback_allocations_total.load(Ordering::Relaxed), 1);

        store.down.store(false, Ordering::SeqCst);
        let recovered = issuer.issue().unwrap();
        assert!(!recovered.degraded);
        assert_eq!(recovered.number.display, "20250923-002");
    }
}
