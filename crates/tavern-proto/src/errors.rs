//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or framing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame length prefix exceeds the configured maximum.
    ///
    /// Fatal for the connection: a peer claiming an oversized frame is
    /// either broken or hostile, and the stream cannot be resynchronized.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Claimed frame size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// CBOR encoding or decoding failed.
    ///
    /// Inbound: the frame is malformed and the connection should be torn
    /// down. Outbound: indicates a bug in payload construction.
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame of an unexpected kind arrived where a specific one was
    /// required (e.g. the connection handshake).
    #[error("unexpected frame kind: expected {expected:?}, got {got:?}")]
    UnexpectedKind {
        /// Kind the receiver required
        expected: &'static str,
        /// Kind that actually arrived
        got: String,
    },

    /// Underlying transport I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
