pub mod backends;
pub mod config;
pub mod error;
pub mod queue;
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, FileBackingStoreBuilder, MemoryBackingStore, TestBackingStore};
pub use config::{BackendConfig, MemoryConfig, SpoolConfig};
pub use error::{Result, SpoolError, ValidationError};
pub use queue::DiskQueue;
pub use r#trait::BackingStore;
pub use types::SpooledEnvelopeId;
