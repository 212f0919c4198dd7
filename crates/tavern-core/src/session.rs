//! Per-player session state.
//!
//! A [`PlayerSession`] is the persistent, in-memory face of a player: it
//! survives disconnects and is never destroyed while the process runs.
//! Live connections come and go underneath it; the session carries the
//! delivery state that bridges them: the missed-message buffer replayed
//! on reconnect, the set of sequence numbers awaiting acknowledgment, the
//! changed flag consumed by the state differ, and the reconnection handoff
//! slot.

use std::{collections::HashSet, fmt};

use bytes::Bytes;
use tavern_proto::{PlayerId, PlayerRecord};
use tokio::sync::oneshot;

/// Identity of one live transport-level connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A reliability-tracked message that could not be delivered immediately,
/// held for replay on reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedMessage {
    /// Encoded envelope bytes, ready to re-enqueue.
    pub payload: Bytes,
    /// Original delivery sequence number (never 0).
    pub msg_num: u64,
}

/// Persistent player state plus live delivery bookkeeping.
#[derive(Debug)]
pub struct PlayerSession {
    /// The persisted record (identity, alias, balances).
    pub record: PlayerRecord,
    /// Undelivered tracked messages, in original delivery order.
    pub missed: Vec<MissedMessage>,
    /// Sequence numbers delivered to this player but not yet acknowledged.
    pub to_ack: HashSet<u64>,
    /// Include this player in the next state diff.
    pub changed: bool,
    /// Reconnection handoff slot: at most one waiter, fulfilled exactly
    /// once with the reconnecting connection's ID. `Some` means something
    /// is actively waiting.
    pub handoff: Option<oneshot::Sender<ConnectionId>>,
}

impl PlayerSession {
    /// Fresh session around a record, marked changed so the next diff
    /// broadcast includes it.
    pub fn new(record: PlayerRecord) -> Self {
        Self { record, missed: Vec::new(), to_ack: HashSet::new(), changed: true, handoff: None }
    }

    /// Player identity shortcut.
    pub fn id(&self) -> &PlayerId {
        &self.record.id
    }

    /// Fulfill the handoff slot, if armed. Returns whether a waiter was
    /// notified (a dropped receiver counts as cancelled, not notified).
    pub fn fulfill_handoff(&mut self, conn: ConnectionId) -> bool {
        match self.handoff.take() {
            Some(waiter) => waiter.send(conn).is_ok(),
            None => false,
        }
    }
}
