//! Tagged message envelope.
//!
//! The envelope is the unit of the frame stream in both directions. The
//! `kind` string is the routing discriminator; `msg_num` carries the
//! delivery sequence number for reliability-tracked messages (0 means no
//! tracking was requested); `body` is an opaque CBOR value decoded on
//! demand by whoever understands the kind.
//!
//! Unlike a closed opcode enum, kinds are open-ended: the broker forwards
//! unknown kinds untouched so game layers can define their own messages.

use bytes::Bytes;
use ciborium::Value;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::errors::ProtocolError;

/// Reserved envelope kinds understood by the broker itself.
///
/// Anything not listed here passes through as an application message.
pub mod kind {
    /// Connection handshake; must be the first frame on a connection.
    pub const JOIN: &str = "join";
    /// Liveness probe, sent by the server's writer pump.
    pub const PING: &str = "ping";
    /// Liveness reply, consumed by the server's reader pump.
    pub const PONG: &str = "pong";
    /// Acknowledgment of a reliability-tracked message.
    pub const ACK: &str = "ack";
    /// Identity/status reply sent once per connection establishment.
    pub const PLAYER_STATUS: &str = "player_status";
    /// Introspection reply listing current players and games.
    pub const LOBBY_INFO: &str = "lobby_info";
    /// Incremental description of changed and removed players.
    pub const STATE_DIFF: &str = "state_diff";
}

fn null_body() -> Value {
    Value::Null
}

fn is_null(v: &Value) -> bool {
    matches!(v, Value::Null)
}

/// One wire frame: kind discriminator, optional sequence number, opaque
/// body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message discriminator (see [`kind`] for reserved values).
    pub kind: String,

    /// Delivery sequence number. 0 means no acknowledgment tracking.
    #[serde(default)]
    pub msg_num: u64,

    /// Message body; shape is determined by `kind`.
    #[serde(default = "null_body", skip_serializing_if = "is_null")]
    pub body: Value,
}

impl Envelope {
    /// Build an envelope with a typed body.
    pub fn new<T: Serialize>(
        kind: impl Into<String>,
        msg_num: u64,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        let body = Value::serialized(body).map_err(|e| ProtocolError::Codec(e.to_string()))?;
        Ok(Self { kind: kind.into(), msg_num, body })
    }

    /// Build a body-less envelope (ping, pong).
    pub fn bare(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), msg_num: 0, body: Value::Null }
    }

    /// Decode the body into a typed payload.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.body.deserialized().map_err(|e| ProtocolError::Codec(e.to_string()))
    }

    /// Encode to CBOR bytes (without the transport length prefix).
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ProtocolError::Codec(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Ack;

    #[test]
    fn envelope_round_trip() {
        let env = Envelope::new(kind::ACK, 0, &Ack { msg_num: 7 }).unwrap();
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded.kind, kind::ACK);
        assert_eq!(decoded.msg_num, 0);
        let ack: Ack = decoded.body().unwrap();
        assert_eq!(ack.msg_num, 7);
    }

    #[test]
    fn bare_envelope_has_null_body() {
        let env = Envelope::bare(kind::PING);
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded.kind, kind::PING);
        assert_eq!(decoded.body, Value::Null);
    }

    #[test]
    fn msg_num_defaults_to_zero() {
        // A map without msg_num decodes with msg_num == 0.
        let mut buf = Vec::new();
        let value = Value::Map(vec![(
            Value::Text("kind".to_string()),
            Value::Text("whatever".to_string()),
        )]);
        ciborium::into_writer(&value, &mut buf).unwrap();

        let env = Envelope::decode(&buf).unwrap();
        assert_eq!(env.msg_num, 0);
        assert_eq!(env.kind, "whatever");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Envelope::decode(&[0xff, 0x00, 0x13, 0x37]).is_err());
    }
}
