mod blob_backend;
mod counter_backend;
mod file;
mod local;
mod memory;
pub mod retry;
mod rocksdb;
mod s3;
mod sqlite;

pub use blob_backend::BlobBackend;
pub use counter_backend::{CounterBackend, CounterBackendKind};
pub use file::FileCounterStore;
pub use local::LocalBlobStore;
pub use memory::MemoryCounterStore;
pub use retry::{is_retryable_s3_error, RetryConfig};
pub use rocksdb::RocksDbCounterStore;
pub use s3::S3BlobStore;
pub use sqlite::SqliteCounterStore;
