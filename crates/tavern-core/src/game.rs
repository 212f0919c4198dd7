//! Turn-based game abstraction.
//!
//! The broker is agnostic to concrete game rules: it only needs the
//! capability set below to admit and remove players and to describe a game
//! for introspection replies. Concrete variants (move validation, win
//! conditions) live outside this crate.

use tavern_proto::{GameInfo, PlayerId, Table};

/// Capability set the broker requires of a registered game.
pub trait TurnBasedGame: Send {
    /// Admit a player into the game's matchmaking pool.
    fn admit_player(&mut self, player: &PlayerId);

    /// Remove a player from all of the game's tables and pools. Called
    /// when a reconnecting client abandons its in-progress state.
    fn remove_player(&mut self, player: &PlayerId);

    /// Open a new table owned by `owner`.
    fn create_table(&mut self, owner: &PlayerId, capacity: usize, private: bool) -> Table;

    /// Serializable summary for introspection replies.
    fn describe(&self) -> GameInfo;
}

pub mod testing {
    //! A minimal stub game for exercising the broker's game seam in tests.

    use super::*;

    /// Counts calls and keeps one flat player list; no rules at all.
    #[derive(Debug, Default)]
    pub struct StubGame {
        /// Players currently admitted.
        pub players: Vec<PlayerId>,
        /// Open tables.
        pub tables: Vec<Table>,
    }

    impl TurnBasedGame for StubGame {
        fn admit_player(&mut self, player: &PlayerId) {
            if !self.players.contains(player) {
                self.players.push(player.clone());
            }
        }

        fn remove_player(&mut self, player: &PlayerId) {
            self.players.retain(|p| p != player);
            for table in &mut self.tables {
                table.player_ids.retain(|p| p != player);
            }
        }

        fn create_table(&mut self, owner: &PlayerId, _capacity: usize, private: bool) -> Table {
            let table = Table {
                id: format!("t{}", self.tables.len() + 1),
                player_ids: vec![owner.clone()],
                bet: 0,
                private,
            };
            self.tables.push(table.clone());
            table
        }

        fn describe(&self) -> GameInfo {
            GameInfo { tables: self.tables.clone() }
        }
    }

}
