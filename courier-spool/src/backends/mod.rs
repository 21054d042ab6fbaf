//! Backing store implementations for the disk queue
//!
//! - `file`: one file per envelope, for production use
//! - `memory`: in-process storage for tests and ephemeral clients
//! - `test`: a memory store with fault injection and operation counters

pub mod file;
pub mod memory;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
