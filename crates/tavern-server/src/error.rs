//! Server error types.

use tavern_proto::ProtocolError;
use thiserror::Error;

use crate::storage::StoreError;

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, missing TLS certs).
    ///
    /// Fatal: fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (connection failure, endpoint closed,
    /// timeout). Fatal for the connection involved, not for the server.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol violation (malformed frame, unexpected kind). Fatal for
    /// that connection; the reader tears it down.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake failure (missing or invalid join frame, version below
    /// the supported minimum).
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Player store failure. Identity resolution degrades to a freshly
    /// minted session rather than failing the connection; this variant
    /// surfaces only where storage is the operation itself.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_layer_prefix() {
        let err = ServerError::Config("bad bind address".to_string());
        assert_eq!(err.to_string(), "configuration error: bad bind address");

        let err = ServerError::Handshake("version 3 below minimum 54".to_string());
        assert!(err.to_string().starts_with("handshake error"));
    }
}
