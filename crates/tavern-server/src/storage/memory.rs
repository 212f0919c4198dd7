//! In-memory player store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tavern_proto::{PlayerId, PlayerRecord};

use super::{PlayerStore, StoreError};

/// HashMap-backed store for development and tests.
///
/// State is shared across clones via `Arc<Mutex<_>>`. A poisoned mutex
/// surfaces as `StoreError::Io`, which resolution treats the same as any
/// other storage outage.
#[derive(Clone, Default)]
pub struct MemoryPlayerStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    players: HashMap<PlayerId, PlayerRecord>,
    by_device: HashMap<String, PlayerId>,
}

impl MemoryPlayerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.players.len()).unwrap_or(0)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn find_by_id(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Io("lock poisoned".to_string()))?;
        Ok(inner.players.get(id).cloned())
    }

    fn find_by_device(&self, device_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Io("lock poisoned".to_string()))?;
        Ok(inner.by_device.get(device_id).and_then(|id| inner.players.get(id)).cloned())
    }

    fn insert(&self, record: &PlayerRecord) -> Result<(), StoreError> {
        let mut inner =
            self.inner.lock().map_err(|_| StoreError::Io("lock poisoned".to_string()))?;
        if let Some(device) = &record.device_id {
            inner.by_device.insert(device.clone(), record.id.clone());
        }
        inner.players.insert(record.id.clone(), record.clone());
        Ok(())
    }
}
