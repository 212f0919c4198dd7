//! Runtime-agnostic domain model for the Tavern session broker.
//!
//! Holds everything the coordination loop reasons about that does not touch
//! I/O: the [`env::Environment`] abstraction (time, randomness), per-player
//! session state with its missed-message buffer and reconnection handoff
//! slot, the turn-based-game capability trait, the replay pacing policy,
//! and the process-wide sequence number source.

pub mod env;
pub mod game;
pub mod pacing;
pub mod seq;
pub mod session;

pub use env::Environment;
pub use game::TurnBasedGame;
pub use pacing::ReplayPacing;
pub use seq::SequenceSource;
pub use session::{ConnectionId, MissedMessage, PlayerSession};
