pub mod blob;
pub mod converter;
pub mod counter;
pub mod error;
pub mod sequence;

pub use blob::{validate_blob_key, BlobStore, BlobStoreInfo};
pub use converter::{DocumentConverter, SourceDocument};
pub use counter::{validate_scope_key, CounterRecord, CounterStore};
pub use error::{
    AllocationError, ContractorError, ConversionError, CounterError, DocumentError, LockPoisoned,
    LockResultExt, StorageError,
};
pub use sequence::{ContractNumber, ScopePolicy, WrapBound, GLOBAL_SCOPE_KEY};
