//! Typed bodies for the reserved envelope kinds, and the wire-visible
//! player/game model they carry.
//!
//! Maps use `BTreeMap` so encoded frames are byte-stable for a given
//! logical content.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Opaque, stable player identity.
///
/// Survives reconnects and process restarts; minted server-side when a
/// connection presents no identity of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wrap an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last `n` characters, used for human-readable default aliases.
    pub fn suffix(&self, n: usize) -> &str {
        if n == 0 {
            return "";
        }
        // Count characters from the end so a claimed ID ending in a
        // multibyte character cannot split the slice mid-codepoint.
        let start = self.0.char_indices().rev().nth(n - 1).map_or(0, |(i, _)| i);
        &self.0[start..]
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Persisted per-player record, serialized into status messages and state
/// diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Stable identity.
    pub id: PlayerId,
    /// Device identifier used for identity recovery when no player ID is
    /// presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Display name.
    pub alias: String,
    /// Flag emoji shown next to the alias.
    pub flag: String,
    /// Premium currency balance.
    pub diamonds: i64,
    /// Soft currency balance.
    pub pretzels: i64,
}

impl PlayerRecord {
    /// A fresh record with default cosmetics and starting balances.
    pub fn new(id: PlayerId, device_id: Option<String>) -> Self {
        Self {
            id,
            device_id,
            alias: "New player".to_string(),
            flag: "🏳️".to_string(),
            diamonds: 100,
            pretzels: 0,
        }
    }
}

/// Connection-setup metadata; body of the first (`join`) frame on every
/// connection, read once and never repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Claimed player identity, if the client has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// Client claims it was previously connected; selects replay over
    /// game exclusion on reconnect.
    #[serde(default)]
    pub was_connected: bool,
    /// Device identifier for identity recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Client protocol version.
    #[serde(default)]
    pub version: u32,
    /// Table the client believes it was seated at, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
}

/// Body of an `ack` frame: acknowledges receipt of the tracked message
/// with this sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Sequence number being acknowledged.
    pub msg_num: u64,
}

/// Body of the `player_status` message sent once per connection
/// establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// The resolved player record.
    pub player: PlayerRecord,
    /// Whether the player was already live in process memory when this
    /// connection arrived.
    pub found_in_lobby: bool,
}

/// One table within a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table identity, unique within its game.
    pub id: String,
    /// Seated players.
    pub player_ids: Vec<PlayerId>,
    /// Stake per player.
    pub bet: i64,
    /// Invisible to matchmaking when true.
    pub private: bool,
}

/// Serializable summary of one registered game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    /// Currently open tables.
    pub tables: Vec<Table>,
}

/// Body of the `lobby_info` introspection reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyInfo {
    /// Every live player session's record.
    pub players: BTreeMap<PlayerId, PlayerRecord>,
    /// Every registered game.
    pub games: BTreeMap<String, GameInfo>,
}

/// Body of the `state_diff` broadcast: changed players map to their full
/// current record, removed players to an explicit `None` tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Player mutations since the previous diff.
    pub players: BTreeMap<PlayerId, Option<PlayerRecord>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, kind};

    #[test]
    fn join_defaults_fill_missing_fields() {
        // A client sending only a player_id gets defaults for the rest.
        #[derive(Serialize)]
        struct Partial<'a> {
            player_id: &'a str,
        }

        let env = Envelope::new(kind::JOIN, 0, &Partial { player_id: "abc" }).unwrap();
        let join: Join = env.body().unwrap();

        assert_eq!(join.player_id, Some(PlayerId::from("abc")));
        assert!(!join.was_connected);
        assert_eq!(join.version, 0);
        assert!(join.device_id.is_none());
    }

    #[test]
    fn state_diff_tombstones_survive_round_trip() {
        let mut players = BTreeMap::new();
        players.insert(PlayerId::from("gone"), None);
        players
            .insert(PlayerId::from("p1"), Some(PlayerRecord::new(PlayerId::from("p1"), None)));

        let env = Envelope::new(kind::STATE_DIFF, 0, &StateDiff { players }).unwrap();
        let bytes = env.encode().unwrap();
        let diff: StateDiff = Envelope::decode(&bytes).unwrap().body().unwrap();

        assert_eq!(diff.players.len(), 2);
        assert!(diff.players[&PlayerId::from("gone")].is_none());
        assert!(diff.players[&PlayerId::from("p1")].is_some());
    }

    #[test]
    fn player_id_suffix() {
        let id = PlayerId::from("0123456789abcdef");
        assert_eq!(id.suffix(4), "cdef");
        assert_eq!(PlayerId::from("ab").suffix(4), "ab");
        assert_eq!(id.suffix(0), "");
    }

    #[test]
    fn player_id_suffix_respects_char_boundaries() {
        // Claimed IDs are arbitrary client strings.
        let id = PlayerId::from("dragon-🐉");
        assert_eq!(id.suffix(2), "-🐉");
        assert_eq!(PlayerId::from("🐉").suffix(4), "🐉");
    }
}
