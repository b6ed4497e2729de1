//! Observability metrics.
//!
//! All metrics use lock-free atomics so recording stays off the
//! allocation critical path.

pub mod histogram;
pub mod registry;

pub use histogram::Histogram;
pub use registry::{
    AllocationMetrics, ApiMetrics, ConversionMetrics, DocumentMetrics, MetricsRegistry,
};
