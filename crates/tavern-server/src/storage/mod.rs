//! Player store abstraction.
//!
//! Persistent player records live behind this trait; the broker acquires
//! it per call and never caches through it (the in-memory session map is
//! the live cache). The trait is synchronous: lookups happen once per
//! connection establishment inside the coordination loop, and both
//! backends answer from memory or a local embedded database.

mod memory;
mod redb;

use tavern_proto::{PlayerId, PlayerRecord};
use thiserror::Error;

pub use self::{memory::MemoryPlayerStore, redb::RedbPlayerStore};

/// Errors from player store backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying I/O or database failure. May be transient.
    #[error("store i/o error: {0}")]
    Io(String),

    /// Record (de)serialization failure. Indicates corruption or a
    /// version mismatch; not transient.
    #[error("store codec error: {0}")]
    Codec(String),
}

/// Lookup/insert interface over persistent player records.
///
/// Clones share the same underlying storage. Lookup misses are `Ok(None)`,
/// not errors; resolution treats `Err` as "storage unavailable" and
/// degrades to a freshly minted session.
pub trait PlayerStore: Clone + Send + Sync + 'static {
    /// Find a record by player ID.
    fn find_by_id(&self, id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError>;

    /// Find a record by device identifier (identity recovery when no
    /// player ID was presented or the ID lookup missed).
    fn find_by_device(&self, device_id: &str) -> Result<Option<PlayerRecord>, StoreError>;

    /// Insert (or overwrite) a record, indexing its device ID if present.
    fn insert(&self, record: &PlayerRecord) -> Result<(), StoreError>;
}
