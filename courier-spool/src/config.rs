use std::sync::Arc;

use serde::Deserialize;

use crate::{
    DiskQueue, FileBackingStore, MemoryBackingStore, Result, ValidationError,
    queue::DEFAULT_MAX_ENVELOPES, r#trait::BackingStore,
};

/// Where queued envelopes are kept
///
/// ```toml
/// [spool.backend]
/// type = "File"
/// path = "/var/cache/courier/envelopes"
/// ```
///
/// ```toml
/// [spool.backend]
/// type = "Memory"
/// capacity = 100
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    File(FileBackingStore),
    /// Nothing survives a restart
    Memory(MemoryConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::File(FileBackingStore::default())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Hard limit on stored envelopes, writes beyond it fail
    #[serde(default)]
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpoolConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    /// Oldest envelopes are evicted beyond this count
    #[serde(default = "SpoolConfig::default_max_envelopes")]
    pub max_envelopes: usize,

    /// Oldest envelopes are evicted while the queue is larger than this
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            max_envelopes: Self::default_max_envelopes(),
            max_bytes: None,
        }
    }
}

impl SpoolConfig {
    const fn default_max_envelopes() -> usize {
        DEFAULT_MAX_ENVELOPES
    }

    /// In-memory queue, mostly for tests.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: BackendConfig::Memory(MemoryConfig::default()),
            ..Self::default()
        }
    }

    /// The queue directory for file-backed queues
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match &self.backend {
            BackendConfig::File(store) => Some(store.path()),
            BackendConfig::Memory(_) => None,
        }
    }

    /// Build and initialise the configured backing store.
    ///
    /// # Errors
    /// If a file store's directory cannot be created or is not a directory
    pub fn into_backing_store(self) -> Result<Arc<dyn BackingStore>> {
        match self.backend {
            BackendConfig::File(store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            BackendConfig::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }

    /// # Errors
    /// - If `max_envelopes` or `max_bytes` is zero
    /// - If the backing store cannot be initialised
    pub fn into_queue(self) -> Result<DiskQueue> {
        if self.max_envelopes == 0 {
            return Err(ValidationError::InvalidConfiguration(
                "max_envelopes must be at least 1".to_string(),
            )
            .into());
        }

        if self.max_bytes == Some(0) {
            return Err(ValidationError::InvalidConfiguration(
                "max_bytes must be greater than 0".to_string(),
            )
            .into());
        }

        let max_envelopes = self.max_envelopes;
        let max_bytes = self.max_bytes;

        Ok(DiskQueue::new(self.into_backing_store()?, max_envelopes).with_max_bytes(max_bytes))
    }
}
