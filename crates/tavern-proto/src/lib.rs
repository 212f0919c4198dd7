//! Wire protocol for the Tavern session broker.
//!
//! Every frame on the wire is a CBOR-encoded [`Envelope`]: a `kind`
//! discriminator, an optional delivery sequence number (`msg_num`, 0 means
//! untracked), and an opaque body. The broker routes frames by `kind` and
//! `msg_num` without interpreting application bodies; only the reserved
//! kinds in [`kind`] have typed bodies defined here.
//!
//! Frames are length-prefixed on the transport; see [`codec`].

mod envelope;
mod errors;
pub mod codec;
pub mod payloads;

pub use envelope::{Envelope, kind};
pub use errors::ProtocolError;
pub use payloads::{Ack, GameInfo, Join, LobbyInfo, PlayerStatus, StateDiff, Table};
pub use payloads::{PlayerId, PlayerRecord};

/// ALPN identifier negotiated during the TLS handshake.
pub const ALPN_PROTOCOL: &[u8] = b"tavern";

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
