//! State-diff accumulation.
//!
//! Between broadcasts the differ collects removals; sessions carry their
//! own `changed` flag. A diff drains both: removed players become `None`
//! tombstones, changed sessions map to their full current record. Records
//! are inserted after tombstones, so a player that was removed and then
//! changed again in the same window shows up with its record, not a
//! tombstone.

use tavern_proto::{PlayerId, StateDiff};

use crate::registry::PlayerRegistry;

/// Accumulates player removals and drains them, together with changed
/// sessions, into [`StateDiff`] broadcasts.
#[derive(Debug, Default)]
pub struct StateDiffer {
    removed: Vec<PlayerId>,
}

impl StateDiffer {
    /// A differ with nothing accumulated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a removal tombstone for the next diff.
    pub fn push_removed(&mut self, player: PlayerId) {
        self.removed.push(player);
    }

    /// Drain all accumulated mutations into a diff, clearing every
    /// session's changed flag and the removal queue. Returns `None` when
    /// nothing changed since the previous diff.
    pub fn diff(&mut self, registry: &mut PlayerRegistry) -> Option<StateDiff> {
        let mut diff = StateDiff::default();

        for player in self.removed.drain(..) {
            diff.players.insert(player, None);
        }

        for session in registry.sessions_mut() {
            if session.changed {
                session.changed = false;
                diff.players.insert(session.id().clone(), Some(session.record.clone()));
            }
        }

        if diff.players.is_empty() { None } else { Some(diff) }
    }
}
