//! Acknowledgment tracking for reliable broadcasts.
//!
//! Every tracked broadcast (non-zero sequence number) is recorded here
//! until each targeted player has acknowledged it. The verify timer
//! re-broadcasts an entry's payload to its full original target set; a
//! player that already acknowledged sees the duplicate and drops it by
//! sequence number client-side.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tavern_proto::PlayerId;

/// A tracked broadcast awaiting acknowledgment from its targets.
#[derive(Debug, Clone)]
pub struct PendingBroadcast {
    /// Original target set; retries go to all of them.
    pub targets: Vec<PlayerId>,
    /// Encoded envelope bytes, re-sent as-is on retry.
    pub payload: Bytes,
    /// Delivery sequence number (never 0).
    pub msg_num: u64,
    /// Targets that have acknowledged so far.
    pub acked: HashSet<PlayerId>,
}

impl PendingBroadcast {
    fn fully_acked(&self) -> bool {
        self.targets.iter().all(|t| self.acked.contains(t))
    }
}

/// All broadcasts currently awaiting acknowledgment, keyed by sequence
/// number.
#[derive(Debug, Default)]
pub struct BroadcastEngine {
    pending: HashMap<u64, PendingBroadcast>,
}

impl BroadcastEngine {
    /// An engine with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a broadcast. Returns `false` if this sequence number
    /// is already being tracked (a retry of an in-flight broadcast), in
    /// which case the existing entry is kept untouched.
    pub fn track(&mut self, targets: Vec<PlayerId>, payload: Bytes, msg_num: u64) -> bool {
        debug_assert_ne!(msg_num, 0, "untracked messages must not enter the engine");
        if self.pending.contains_key(&msg_num) {
            return false;
        }
        self.pending.insert(
            msg_num,
            PendingBroadcast { targets, payload, msg_num, acked: HashSet::new() },
        );
        true
    }

    /// Record one player's acknowledgment. Returns `true` when this was
    /// the last outstanding target and the entry has been retired.
    pub fn acknowledge(&mut self, msg_num: u64, player: &PlayerId) -> bool {
        let Some(entry) = self.pending.get_mut(&msg_num) else {
            return false;
        };
        entry.acked.insert(player.clone());
        if entry.fully_acked() {
            self.pending.remove(&msg_num);
            true
        } else {
            false
        }
    }

    /// The tracked entry for a sequence number, if still outstanding.
    pub fn pending(&self, msg_num: u64) -> Option<&PendingBroadcast> {
        self.pending.get(&msg_num)
    }

    /// Number of broadcasts still awaiting acknowledgment.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> Vec<PlayerId> {
        ids.iter().map(|id| PlayerId::from(*id)).collect()
    }

    #[test]
    fn entry_retires_when_all_targets_ack() {
        let mut engine = BroadcastEngine::new();
        assert!(engine.track(targets(&["a", "b"]), Bytes::from_static(b"x"), 1));

        assert!(!engine.acknowledge(1, &PlayerId::from("a")));
        assert!(engine.pending(1).is_some());

        assert!(engine.acknowledge(1, &PlayerId::from("b")));
        assert!(engine.pending(1).is_none());
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn duplicate_acks_are_harmless() {
        let mut engine = BroadcastEngine::new();
        engine.track(targets(&["a", "b"]), Bytes::from_static(b"x"), 1);

        assert!(!engine.acknowledge(1, &PlayerId::from("a")));
        assert!(!engine.acknowledge(1, &PlayerId::from("a")));
        assert!(engine.acknowledge(1, &PlayerId::from("b")));
    }

    #[test]
    fn ack_for_unknown_sequence_is_ignored() {
        let mut engine = BroadcastEngine::new();
        assert!(!engine.acknowledge(99, &PlayerId::from("a")));
    }

    #[test]
    fn retracking_an_in_flight_sequence_is_rejected() {
        let mut engine = BroadcastEngine::new();
        engine.track(targets(&["a"]), Bytes::from_static(b"x"), 1);
        assert!(!engine.track(targets(&["a", "b"]), Bytes::from_static(b"y"), 1));
        assert_eq!(engine.pending(1).unwrap().targets.len(), 1);
    }
}
