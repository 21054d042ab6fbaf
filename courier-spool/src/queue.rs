use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use courier_common::{DiscardReason, DiscardRecord, Envelope, internal};
use parking_lot::Mutex;

use crate::{Result, SpoolError, r#trait::BackingStore, types::SpooledEnvelopeId};

/// Matches the number of envelopes the SDK has always kept offline.
pub const DEFAULT_MAX_ENVELOPES: usize = 30;

/// Durable FIFO of encoded envelopes
///
/// Every envelope is stored before it is sent and removed only once the
/// collector accepted it, so anything that did not make it out is still here
/// after a crash or restart.
#[derive(Debug)]
pub struct DiskQueue {
    store: Arc<dyn BackingStore>,
    max_envelopes: usize,
    max_bytes: Option<u64>,
    /// Serialises store+evict and remove so eviction never races a delete.
    lock: Mutex<()>,
}

impl DiskQueue {
    /// `max_envelopes` is clamped to at least one.
    pub fn new(store: Arc<dyn BackingStore>, max_envelopes: usize) -> Self {
        Self {
            store,
            max_envelopes: max_envelopes.max(1),
            max_bytes: None,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub const fn max_envelopes(&self) -> usize {
        self.max_envelopes
    }

    #[must_use]
    pub const fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    #[must_use]
    pub fn backing_store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Encode and persist an envelope.
    ///
    /// # Errors
    /// - [`SpoolError::Serialization`] if the envelope cannot be encoded
    /// - Any storage error from the backing store
    pub fn store(&self, envelope: &Envelope) -> Result<SpooledEnvelopeId> {
        let bytes = envelope.to_bytes()?;
        self.store_bytes(&bytes)
    }

    /// Persist an already encoded envelope.
    ///
    /// # Errors
    /// Any storage error from the backing store
    pub fn store_bytes(&self, bytes: &[u8]) -> Result<SpooledEnvelopeId> {
        let _guard = self.lock.lock();
        self.store.write(bytes)
    }

    /// Identifiers of every queued envelope, oldest first.
    ///
    /// # Errors
    /// If the backing store cannot be listed
    pub fn list_all(&self) -> Result<Vec<SpooledEnvelopeId>> {
        self.store.list()
    }

    /// # Errors
    /// - [`SpoolError::NotFound`] if the entry is gone
    /// - [`SpoolError::Corrupt`] if it no longer decodes
    pub fn read(&self, id: &SpooledEnvelopeId) -> Result<Envelope> {
        let bytes = self.store.read(id)?;
        Envelope::from_bytes(&bytes).map_err(|source| SpoolError::Corrupt {
            id: id.clone(),
            source,
        })
    }

    /// Remove an entry. Removing an entry that is already gone is not an error.
    ///
    /// # Errors
    /// Any other storage error from the backing store
    pub fn remove(&self, id: &SpooledEnvelopeId) -> Result<()> {
        let _guard = self.lock.lock();
        match self.store.delete(id) {
            Err(SpoolError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Evict the oldest entries until both caps hold again.
    ///
    /// Entries evicted because of the count cap produce `queue_overflow`
    /// records, those evicted because of the byte cap produce
    /// `cache_overflow` records. Entries that no longer decode are evicted
    /// without producing records.
    pub fn enforce_capacity(&self) -> Vec<DiscardRecord> {
        let _guard = self.lock.lock();

        let ids = match self.store.list() {
            Ok(ids) => ids,
            Err(err) => {
                internal!(level = ERROR, "Unable to list envelope queue: {err}");
                return Vec::new();
            }
        };

        let overflow = ids.len().saturating_sub(self.max_envelopes);
        let (evicted, kept) = ids.split_at(overflow);

        let mut records = Vec::new();
        for id in evicted {
            internal!(
                level = WARN,
                "Envelope queue is full ({} entries), evicting {id}",
                self.max_envelopes
            );
            records.extend(self.evict(id, DiscardReason::QueueOverflow));
        }

        if let Some(max_bytes) = self.max_bytes {
            let mut sizes: Vec<(&SpooledEnvelopeId, u64)> = kept
                .iter()
                .filter_map(|id| self.store.size(id).ok().map(|size| (id, size)))
                .collect();
            let mut total: u64 = sizes.iter().map(|(_, size)| size).sum();

            sizes.reverse();
            while total > max_bytes {
                let Some((id, size)) = sizes.pop() else {
                    break;
                };

                internal!(
                    level = WARN,
                    "Envelope queue exceeds {max_bytes} bytes, evicting {id}"
                );
                records.extend(self.evict(id, DiscardReason::CacheOverflow));
                total -= size;
            }
        }

        records
    }

    /// Delete entries created more than `max_age` before `now`.
    pub fn remove_expired(&self, now: SystemTime, max_age: Duration) -> Vec<DiscardRecord> {
        let Some(cutoff) = now.checked_sub(max_age) else {
            return Vec::new();
        };
        let cutoff_ms = cutoff
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX));

        let _guard = self.lock.lock();

        let ids = match self.store.list() {
            Ok(ids) => ids,
            Err(err) => {
                internal!(level = ERROR, "Unable to list envelope queue: {err}");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for id in ids.iter().take_while(|id| id.timestamp_ms() < cutoff_ms) {
            internal!(level = INFO, "Envelope {id} is older than {max_age:?}, deleting");
            records.extend(self.evict(id, DiscardReason::CacheOverflow));
        }

        records
    }

    /// Must be called with `lock` held.
    fn evict(&self, id: &SpooledEnvelopeId, reason: DiscardReason) -> Vec<DiscardRecord> {
        let records = self
            .store
            .read(id)
            .ok()
            .and_then(|bytes| Envelope::from_bytes(&bytes).ok())
            .map(|envelope| DiscardRecord::for_items(&envelope.items, reason))
            .unwrap_or_default();

        match self.store.delete(id) {
            Ok(()) | Err(SpoolError::NotFound(_)) => records,
            Err(err) => {
                internal!(level = ERROR, "Unable to evict envelope {id}: {err}");
                Vec::new()
            }
        }
    }

    /// Number of queued envelopes. A store that cannot be listed counts as empty.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.list().map_or(0, |ids| ids.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every queued envelope, returning how many were removed.
    ///
    /// # Errors
    /// If the store cannot be listed or an entry cannot be deleted
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock();

        let mut removed = 0;
        for id in self.store.list()? {
            match self.store.delete(&id) {
                Ok(()) => removed += 1,
                Err(SpoolError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(removed)
    }
}
