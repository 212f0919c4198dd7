//! Redb-backed durable player store.
//!
//! Two tables: `players` maps player ID to a CBOR-encoded record, and
//! `devices` maps device identifier to player ID so identity recovery by
//! device is a second O(log n) lookup rather than a scan.

use std::{path::Path, sync::Arc};

use redb::{Database, TableDefinition};
use tavern_proto::{PlayerId, PlayerRecord};

use super::{PlayerStore, StoreError};

/// Table: player ID → CBOR-encoded `PlayerRecord`.
const PLAYERS: TableDefinition<&str, &[u8]> = TableDefinition::new("players");

/// Table: device identifier → player ID.
const DEVICES: TableDefinition<&str, &str> = TableDefinition::new("devices");

/// Durable player store backed by redb.
///
/// Thread-safe through redb's internal locking; clones share the database
/// via `Arc`.
#[derive(Clone)]
pub struct RedbPlayerStore {
    db: Arc<Database>,
}

impl RedbPlayerStore {
    /// Open or create a database at the given path, creating both tables
    /// if they do not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(PLAYERS).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(DEVICES).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn load(&self, id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(PLAYERS).map_err(|e| StoreError::Io(e.to_string()))?;

        match table.get(id).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(guard) => {
                let record = ciborium::from_reader(guard.value())
                    .map_err(|e| StoreError::Codec(e.to_string()))?;
                Ok(Some(record))
            },
            None => Ok(None),
        }
    }
}

impl PlayerStore for RedbPlayerStore {
    fn find_by_id(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
        self.load(id.as_str())
    }

    fn find_by_device(&self, device_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        let id = {
            let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
            let table = txn.open_table(DEVICES).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .get(device_id)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .map(|guard| guard.value().to_string())
        };

        match id {
            Some(id) => self.load(&id),
            None => Ok(None),
        }
    }

    fn insert(&self, record: &PlayerRecord) -> Result<(), StoreError> {
        let mut encoded = Vec::new();
        ciborium::into_writer(record, &mut encoded)
            .map_err(|e| StoreError::Codec(e.to_string()))?;

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut players = txn.open_table(PLAYERS).map_err(|e| StoreError::Io(e.to_string()))?;
            players
                .insert(record.id.as_str(), encoded.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;

            if let Some(device) = &record.device_id {
                let mut devices =
                    txn.open_table(DEVICES).map_err(|e| StoreError::Io(e.to_string()))?;
                devices
                    .insert(device.as_str(), record.id.as_str())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }
}
