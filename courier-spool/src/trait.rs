use crate::{Result, SpooledEnvelopeId};

/// Storage underneath the disk queue
///
/// Implementations store opaque byte blobs. Every method may be called from
/// any thread; `write` must be atomic, so a reader never observes a partially
/// written entry.
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persist `bytes` under a freshly generated identifier.
    ///
    /// # Errors
    /// If the entry cannot be written
    fn write(&self, bytes: &[u8]) -> Result<SpooledEnvelopeId>;

    /// All identifiers currently stored, oldest first.
    ///
    /// # Errors
    /// If the underlying storage cannot be enumerated
    fn list(&self) -> Result<Vec<SpooledEnvelopeId>>;

    /// # Errors
    /// [`crate::SpoolError::NotFound`] if there is no such entry
    fn read(&self, id: &SpooledEnvelopeId) -> Result<Vec<u8>>;

    /// # Errors
    /// [`crate::SpoolError::NotFound`] if there is no such entry
    fn delete(&self, id: &SpooledEnvelopeId) -> Result<()>;

    /// Size in bytes of a stored entry.
    ///
    /// # Errors
    /// [`crate::SpoolError::NotFound`] if there is no such entry
    fn size(&self, id: &SpooledEnvelopeId) -> Result<u64>;
}
