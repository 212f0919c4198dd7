//! Per-connection pump pair.
//!
//! Every connection runs exactly two tasks against its stream pair: a
//! read pump that turns inbound frames into lobby events, and a write
//! pump that drains the connection's outbound queue. Neither touches
//! shared state; the read pump talks to the loop through a
//! [`LobbyHandle`] and the write pump owns the receiving half of the
//! queue. Both are generic over the stream halves so tests can drive them
//! over in-memory pipes.

use std::time::Duration;

use bytes::Bytes;
use tavern_core::ConnectionId;
use tavern_proto::{Envelope, Join, ProtocolError, codec, kind};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::timeout,
};

use crate::{
    error::ServerError,
    lobby::{LobbyEvent, LobbyHandle},
};

/// Per-connection timing and sizing knobs.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for one transport write.
    pub write_timeout: Duration,
    /// A connection that sends nothing (not even a pong) for this long is
    /// dead.
    pub read_idle_timeout: Duration,
    /// Probe an idle outbound side with a ping this often. Must be below
    /// `read_idle_timeout` so a healthy client always has something to
    /// answer.
    pub ping_period: Duration,
    /// Deadline for the join frame on a fresh connection.
    pub handshake_timeout: Duration,
    /// Largest accepted inbound frame.
    pub max_frame_size: usize,
    /// Outbound queue depth before the connection is considered stuck.
    pub send_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            read_idle_timeout: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            handshake_timeout: Duration::from_secs(30),
            max_frame_size: 64 * 1024,
            send_queue_capacity: 256,
        }
    }
}

/// Read the mandatory first frame of a connection.
pub async fn read_join<R>(reader: &mut R, config: &ConnectionConfig) -> Result<Join, ServerError>
where
    R: AsyncRead + Unpin,
{
    let envelope = timeout(
        config.handshake_timeout,
        codec::read_frame(reader, config.max_frame_size),
    )
    .await
    .map_err(|_| ServerError::Handshake("no join frame before deadline".to_string()))??;

    if envelope.kind != kind::JOIN {
        return Err(ServerError::Protocol(ProtocolError::UnexpectedKind {
            expected: kind::JOIN,
            got: envelope.kind,
        }));
    }
    Ok(envelope.body()?)
}

/// Drive inbound frames into the lobby until the connection errors out or
/// goes idle past the deadline.
pub async fn read_pump<R>(
    reader: &mut R,
    conn: ConnectionId,
    lobby: &LobbyHandle,
    config: &ConnectionConfig,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
{
    let seq = lobby.sequence();
    loop {
        let mut envelope =
            timeout(config.read_idle_timeout, codec::read_frame(reader, config.max_frame_size))
                .await
                .map_err(|_| ServerError::Transport("read idle timeout".to_string()))??;

        match envelope.kind.as_str() {
            // Keepalive traffic only resets the idle deadline.
            kind::PING | kind::PONG => {},
            kind::ACK => {
                let ack: tavern_proto::Ack = envelope.body()?;
                lobby.send(LobbyEvent::Ack { from: conn, msg_num: ack.msg_num });
            },
            kind::JOIN => {
                tracing::debug!(%conn, "duplicate join frame ignored");
            },
            _ => {
                // Untracked inbound actions get a delivery sequence
                // number here, before any rebroadcast can need one.
                if envelope.msg_num == 0 {
                    envelope.msg_num = seq.next();
                }
                let name = envelope.kind.clone();
                let msg_num = envelope.msg_num;
                let payload = envelope.encode()?;
                lobby.send(LobbyEvent::Action { name, payload, from: conn, msg_num });
            },
        }
    }
}

/// Drain the outbound queue onto the transport, probing with pings while
/// idle. Returns `Ok` when the queue closes (orderly eviction), `Err` on
/// transport failure.
pub async fn write_pump<W>(
    writer: &mut W,
    rx: &mut mpsc::Receiver<Bytes>,
    config: &ConnectionConfig,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let ping = Envelope::bare(kind::PING).encode()?;
    let mut last_write = tokio::time::Instant::now();
    let mut probe = tokio::time::interval(config.ping_period);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    probe.reset();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(first) => {
                    // Drain whatever accumulated while the last write was
                    // in flight into one transport write.
                    let mut batch = vec![first];
                    while let Ok(more) = rx.try_recv() {
                        batch.push(more);
                    }
                    timed_write(writer, &batch, config.write_timeout).await?;
                    last_write = tokio::time::Instant::now();
                },
                None => {
                    // Queue dropped by the loop: flush what went out and
                    // end the connection from our side.
                    let _ = timeout(config.write_timeout, writer.shutdown()).await;
                    return Ok(());
                },
            },
            _ = probe.tick() => {
                if last_write.elapsed() >= config.ping_period {
                    timed_write(writer, std::slice::from_ref(&ping), config.write_timeout)
                        .await?;
                    last_write = tokio::time::Instant::now();
                }
            },
        }
    }
}

async fn timed_write<W>(
    writer: &mut W,
    frames: &[Bytes],
    deadline: Duration,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    timeout(deadline, codec::write_frames(writer, frames))
        .await
        .map_err(|_| ServerError::Transport("write timeout".to_string()))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tavern_core::SequenceSource;
    use tavern_proto::{Ack, PlayerId};
    use tokio::io::AsyncWriteExt as _;

    use super::*;

    fn lobby_pair() -> (LobbyHandle, mpsc::UnboundedReceiver<LobbyEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LobbyHandle::new(tx, SequenceSource::new()), rx)
    }

    #[tokio::test]
    async fn join_is_required_first() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let config = ConnectionConfig::default();

        let frame = Envelope::bare("chat").encode().unwrap();
        codec::write_frame(&mut client, &frame).await.unwrap();

        let err = read_join(&mut server, &config).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::UnexpectedKind { expected: "join", .. })
        ));
    }

    #[tokio::test]
    async fn join_carries_identity_claims() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let join = Join {
            player_id: Some(PlayerId::from("p1")),
            was_connected: true,
            version: 3,
            ..Join::default()
        };
        let frame = Envelope::new(kind::JOIN, 0, &join).unwrap().encode().unwrap();
        codec::write_frame(&mut client, &frame).await.unwrap();

        let parsed = read_join(&mut server, &ConnectionConfig::default()).await.unwrap();
        assert_eq!(parsed, join);
    }

    #[tokio::test]
    async fn acks_become_lobby_events() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let (lobby, mut events) = lobby_pair();
        let config = ConnectionConfig::default();

        let frame =
            Envelope::new(kind::ACK, 0, &Ack { msg_num: 42 }).unwrap().encode().unwrap();
        codec::write_frame(&mut client, &frame).await.unwrap();
        drop(client);

        let err = read_pump(&mut server, ConnectionId(1), &lobby, &config).await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(ProtocolError::Io(_))));

        match events.try_recv().unwrap() {
            LobbyEvent::Ack { from, msg_num } => {
                assert_eq!(from, ConnectionId(1));
                assert_eq!(msg_num, 42);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn untracked_actions_get_sequence_numbers() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let (lobby, mut events) = lobby_pair();
        let config = ConnectionConfig::default();

        let frame = Envelope::bare("chat").encode().unwrap();
        codec::write_frame(&mut client, &frame).await.unwrap();
        drop(client);

        let _ = read_pump(&mut server, ConnectionId(1), &lobby, &config).await;

        match events.try_recv().unwrap() {
            LobbyEvent::Action { name, payload, msg_num, .. } => {
                assert_eq!(name, "chat");
                assert_ne!(msg_num, 0);
                // The forwarded payload carries the assigned number.
                assert_eq!(Envelope::decode(&payload).unwrap().msg_num, msg_num);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_tears_the_connection_down() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let (lobby, mut events) = lobby_pair();
        let config = ConnectionConfig::default();

        // Valid length prefix, bytes that are not a CBOR envelope.
        client.write_all(&4u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let err =
            read_pump(&mut server, ConnectionId(1), &lobby, &config).await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(ProtocolError::Codec(_))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_pump_batches_a_backlog() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::channel(8);
        let config = ConnectionConfig::default();

        for k in ["a", "b", "c"] {
            tx.try_send(Envelope::bare(k).encode().unwrap()).unwrap();
        }
        drop(tx);

        let pump = tokio::spawn(async move { write_pump(&mut server, &mut rx, &config).await });

        for expected in ["a", "b", "c"] {
            let frame = codec::read_frame(&mut client, 1024).await.unwrap();
            assert_eq!(frame.kind, expected);
        }
        pump.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_writer_probes_with_pings() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let (_tx, mut rx) = mpsc::channel::<Bytes>(8);
        let config =
            ConnectionConfig { ping_period: Duration::from_millis(50), ..Default::default() };

        tokio::spawn(async move {
            let _ = write_pump(&mut server, &mut rx, &config).await;
        });

        let frame = codec::read_frame(&mut client, 1024).await.unwrap();
        assert_eq!(frame.kind, kind::PING);
    }

    #[tokio::test]
    async fn closed_queue_ends_the_pump_cleanly() {
        let (_client, mut server) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::channel::<Bytes>(8);
        drop(tx);

        let result = write_pump(&mut server, &mut rx, &ConnectionConfig::default()).await;
        assert!(result.is_ok());
    }
}
