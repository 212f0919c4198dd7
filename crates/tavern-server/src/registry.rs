//! Player session registry and identity resolution.
//!
//! Sessions live here for the lifetime of the process; connections attach
//! to and detach from them. Identity resolution walks memory, then the
//! durable store by claimed ID, then by device, and mints a fresh identity
//! only when every lookup misses. A store failure is logged and degrades
//! to a memory-only session rather than refusing the connection.

use std::collections::HashMap;

use tavern_core::{Environment, PlayerSession, TurnBasedGame};
use tavern_proto::{LobbyInfo, PlayerId, PlayerRecord};

use crate::storage::PlayerStore;

/// All live player sessions plus the registered games.
#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<PlayerId, PlayerSession>,
    games: HashMap<String, Box<dyn TurnBasedGame>>,
}

impl PlayerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a game under a short name (for example `"rd"`).
    pub fn register_game(&mut self, name: impl Into<String>, game: Box<dyn TurnBasedGame>) {
        self.games.insert(name.into(), game);
    }

    /// The player's session, if live.
    pub fn session(&self, id: &PlayerId) -> Option<&PlayerSession> {
        self.players.get(id)
    }

    /// Mutable access to the player's session, if live.
    pub fn session_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerSession> {
        self.players.get_mut(id)
    }

    /// Mutable view over every session, for the state differ.
    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PlayerSession> {
        self.players.values_mut()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Resolve a connection's identity into a live session.
    ///
    /// Returns the resolved player ID and whether the session was already
    /// live in memory (the caller must then hand the connection off to the
    /// existing session). A new session is created in every other case.
    pub fn resolve<S: PlayerStore, E: Environment>(
        &mut self,
        store: &S,
        env: &E,
        claimed: Option<PlayerId>,
        device: Option<&str>,
    ) -> (PlayerId, bool) {
        if let Some(id) = claimed {
            if self.players.contains_key(&id) {
                return (id, true);
            }

            match store.find_by_id(&id) {
                Ok(Some(record)) => {
                    self.players.insert(id.clone(), PlayerSession::new(record));
                    return (id, false);
                },
                Ok(None) => {},
                Err(error) => {
                    tracing::warn!(%error, player = %id, "player lookup failed, keeping claimed identity");
                },
            }

            // The claim names an identity we have no record of. Honor it
            // with a fresh record so the client keeps its ID across our
            // data loss, not theirs.
            let record = PlayerRecord::new(id.clone(), device.map(str::to_string));
            self.persist(store, &record);
            self.players.insert(id.clone(), PlayerSession::new(record));
            return (id, false);
        }

        if let Some(device) = device {
            match store.find_by_device(device) {
                Ok(Some(record)) => {
                    let id = record.id.clone();
                    if self.players.contains_key(&id) {
                        return (id, true);
                    }
                    self.players.insert(id.clone(), PlayerSession::new(record));
                    return (id, false);
                },
                Ok(None) => {},
                Err(error) => {
                    tracing::warn!(%error, device, "device lookup failed, minting fresh identity");
                },
            }
        }

        let id = PlayerId::new(format!("{:032x}", env.random_u128()));
        let mut record = PlayerRecord::new(id.clone(), device.map(str::to_string));
        record.alias = format!("Player {}", id.suffix(4));
        self.persist(store, &record);
        self.players.insert(id.clone(), PlayerSession::new(record));
        (id, false)
    }

    fn persist<S: PlayerStore>(&self, store: &S, record: &PlayerRecord) {
        if let Err(error) = store.insert(record) {
            tracing::warn!(%error, player = %record.id, "player persist failed, session is memory-only");
        }
    }

    /// Remove a player from every registered game's tables and pools.
    pub fn exclude_from_all_games(&mut self, player: &PlayerId) {
        for game in self.games.values_mut() {
            game.remove_player(player);
        }
    }

    /// Snapshot of every session and game for introspection replies.
    pub fn lobby_info(&self) -> LobbyInfo {
        LobbyInfo {
            players: self
                .players
                .iter()
                .map(|(id, session)| (id.clone(), session.record.clone()))
                .collect(),
            games: self.games.iter().map(|(name, game)| (name.clone(), game.describe())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tavern_core::env::testing::SeededEnv;
    use tavern_core::game::testing::StubGame;

    use super::*;
    use crate::storage::{MemoryPlayerStore, StoreError};

    /// Store whose every operation fails, for degradation tests.
    #[derive(Clone)]
    struct FailingStore;

    impl PlayerStore for FailingStore {
        fn find_by_id(&self, _id: &PlayerId) -> Result<Option<PlayerRecord>, StoreError> {
            Err(StoreError::Io("disk on fire".to_string()))
        }

        fn find_by_device(&self, _device_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
            Err(StoreError::Io("disk on fire".to_string()))
        }

        fn insert(&self, _record: &PlayerRecord) -> Result<(), StoreError> {
            Err(StoreError::Io("disk on fire".to_string()))
        }
    }

    #[test]
    fn unknown_connection_mints_aliased_identity() {
        let mut registry = PlayerRegistry::new();
        let store = MemoryPlayerStore::new();
        let env = SeededEnv::default();

        let (id, found) = registry.resolve(&store, &env, None, None);

        assert!(!found);
        assert_eq!(id.as_str().len(), 32);
        let session = registry.session(&id).unwrap();
        assert_eq!(session.record.alias, format!("Player {}", id.suffix(4)));
        // Brand-new identities are persisted.
        assert!(store.find_by_id(&id).unwrap().is_some());
    }

    #[test]
    fn live_session_resolves_without_store_access() {
        let mut registry = PlayerRegistry::new();
        let env = SeededEnv::default();

        let (id, found) =
            registry.resolve(&MemoryPlayerStore::new(), &env, Some(PlayerId::from("p1")), None);
        assert!(!found);

        // Second connection claiming the same ID hits memory; the store
        // can be broken and it does not matter.
        let (id2, found) = registry.resolve(&FailingStore, &env, Some(id.clone()), None);
        assert!(found);
        assert_eq!(id2, id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stored_record_is_revived_by_id() {
        let store = MemoryPlayerStore::new();
        let mut record = PlayerRecord::new(PlayerId::from("p1"), None);
        record.alias = "Ada".to_string();
        store.insert(&record).unwrap();

        let mut registry = PlayerRegistry::new();
        let (id, found) =
            registry.resolve(&store, &SeededEnv::default(), Some(PlayerId::from("p1")), None);

        assert!(!found);
        assert_eq!(registry.session(&id).unwrap().record.alias, "Ada");
    }

    #[test]
    fn device_fallback_recovers_identity() {
        let store = MemoryPlayerStore::new();
        store.insert(&PlayerRecord::new(PlayerId::from("p1"), Some("dev-1".to_string()))).unwrap();

        let mut registry = PlayerRegistry::new();
        let (id, found) =
            registry.resolve(&store, &SeededEnv::default(), None, Some("dev-1"));

        assert!(!found);
        assert_eq!(id, PlayerId::from("p1"));
    }

    #[test]
    fn claimed_identity_without_record_is_honored() {
        let store = MemoryPlayerStore::new();
        let mut registry = PlayerRegistry::new();

        let (id, found) =
            registry.resolve(&store, &SeededEnv::default(), Some(PlayerId::from("lost")), None);

        assert!(!found);
        assert_eq!(id, PlayerId::from("lost"));
        // Claimed identities keep the stock alias, not a minted one.
        assert_eq!(registry.session(&id).unwrap().record.alias, "New player");
    }

    #[test]
    fn store_failure_degrades_to_memory_only_session() {
        let mut registry = PlayerRegistry::new();
        let (id, found) = registry.resolve(&FailingStore, &SeededEnv::default(), None, Some("d1"));

        assert!(!found);
        assert!(registry.session(&id).is_some());
    }

    #[test]
    fn exclusion_sweeps_every_game() {
        let mut registry = PlayerRegistry::new();
        let p = PlayerId::from("p1");

        let mut a = StubGame::default();
        a.create_table(&p, 2, false);
        let mut b = StubGame::default();
        b.create_table(&p, 2, true);
        registry.register_game("a", Box::new(a));
        registry.register_game("b", Box::new(b));

        registry.exclude_from_all_games(&p);

        let info = registry.lobby_info();
        assert!(info.games["a"].tables[0].player_ids.is_empty());
        assert!(info.games["b"].tables[0].player_ids.is_empty());
    }
}
