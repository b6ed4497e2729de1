pub mod allocator;
pub mod api;
pub mod contracts;
pub mod conversion;
pub mod documents;
pub mod metrics;
pub mod storage;
