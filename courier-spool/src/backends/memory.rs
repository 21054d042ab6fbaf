use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use crate::{Result, SpoolError, r#trait::BackingStore, types::SpooledEnvelopeId};

/// In-memory backing store
///
/// Entries live in a `BTreeMap` behind an `RwLock`, so listing is already in
/// creation order. Nothing survives the process; this is meant for tests and
/// for clients that explicitly opt out of persistence.
///
/// An optional capacity makes writes fail once the store is full, which is
/// useful for exercising the transport's store failure path.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    pub(crate) entries: Arc<RwLock<BTreeMap<SpooledEnvelopeId, Arc<[u8]>>>>,
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Recovers the data if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl BackingStore for MemoryBackingStore {
    fn write(&self, bytes: &[u8]) -> Result<SpooledEnvelopeId> {
        let id = SpooledEnvelopeId::generate();
        let mut entries = self.entries.write()?;

        if let Some(cap) = self.capacity
            && entries.len() >= cap
        {
            return Err(SpoolError::Internal(format!(
                "Memory queue capacity exceeded: {}/{cap} envelopes",
                entries.len()
            )));
        }

        entries.insert(id.clone(), Arc::from(bytes));

        Ok(id)
    }

    fn list(&self) -> Result<Vec<SpooledEnvelopeId>> {
        Ok(self.entries.read()?.keys().cloned().collect())
    }

    fn read(&self, id: &SpooledEnvelopeId) -> Result<Vec<u8>> {
        self.entries
            .read()?
            .get(id)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }

    fn delete(&self, id: &SpooledEnvelopeId) -> Result<()> {
        self.entries
            .write()?
            .remove(id)
            .ok_or_else(|| SpoolError::NotFound(id.clone()))?;
        Ok(())
    }

    fn size(&self, id: &SpooledEnvelopeId) -> Result<u64> {
        self.entries
            .read()?
            .get(id)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }
}
