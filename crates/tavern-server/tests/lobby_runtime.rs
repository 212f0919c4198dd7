//! End-to-end exercise of the lobby runtime: the loop task, its action
//! executor, and the replay machinery, driven over in-process queues in
//! place of real connections.

use std::time::Duration;

use bytes::Bytes;
use tavern_core::{ConnectionId, ReplayPacing, SequenceSource};
use tavern_proto::{Envelope, PlayerId, PlayerStatus, kind};
use tavern_server::{
    ConnectionHandle, Lobby, LobbyConfig, LobbyEvent, LobbyHandle, MemoryPlayerStore, SystemEnv,
    spawn_lobby,
};
use tokio::{sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(5);

fn start_lobby() -> LobbyHandle {
    start_lobby_with(LobbyConfig::default())
}

fn start_lobby_with(config: LobbyConfig) -> LobbyHandle {
    let env = SystemEnv::new();
    let lobby = Lobby::new(config, env.clone(), MemoryPlayerStore::new(), SequenceSource::new());
    spawn_lobby(lobby, env)
}

fn connection(
    id: u64,
    claimed: &str,
    was_connected: bool,
) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = ConnectionHandle {
        id: ConnectionId(id),
        player_id: Some(PlayerId::from(claimed)),
        was_connected,
        version: 1,
        device_id: None,
        table_id: None,
        sender: tx,
    };
    (handle, rx)
}

async fn next_frame(rx: &mut mpsc::Receiver<Bytes>) -> Envelope {
    let bytes = timeout(WAIT, rx.recv()).await.expect("timed out").expect("queue closed");
    Envelope::decode(&bytes).unwrap()
}

fn frame(kind: &str) -> Bytes {
    Envelope::bare(kind).encode().unwrap()
}

#[tokio::test]
async fn disconnect_buffer_reconnect_replay() {
    let lobby = start_lobby();
    let hero = PlayerId::from("hero");

    // Fresh identity: status says so, and the diff announces the player.
    let (handle, mut rx) = connection(1, "hero", false);
    lobby.send(LobbyEvent::Register(handle));

    let status = next_frame(&mut rx).await;
    assert_eq!(status.kind, kind::PLAYER_STATUS);
    let body: PlayerStatus = status.body().unwrap();
    assert!(!body.found_in_lobby);

    let diff = next_frame(&mut rx).await;
    assert_eq!(diff.kind, kind::STATE_DIFF);
    assert_eq!(diff.msg_num, 0);

    // Tracked broadcast reaches the live connection.
    let msg_num = lobby.broadcast(vec![hero.clone()], frame("chat"));
    let chat = next_frame(&mut rx).await;
    assert_eq!(chat.kind, "chat");
    lobby.send(LobbyEvent::Ack { from: ConnectionId(1), msg_num });

    // Someone starts waiting for the player, the connection dies, and two
    // messages land while nobody is listening.
    let waiter = lobby.await_reconnect(hero.clone());
    lobby.send(LobbyEvent::Deregister(ConnectionId(1)));
    drop(rx);

    lobby.broadcast(vec![hero.clone()], frame("turn-a"));
    lobby.broadcast(vec![hero.clone()], frame("turn-b"));

    // Reconnect claiming the same identity and a live history.
    let (handle, mut rx) = connection(2, "hero", true);
    lobby.send(LobbyEvent::Register(handle));

    // The waiter gets the new connection.
    assert_eq!(timeout(WAIT, waiter).await.expect("timed out").unwrap(), ConnectionId(2));

    let status = next_frame(&mut rx).await;
    let body: PlayerStatus = status.body().unwrap();
    assert!(body.found_in_lobby);

    // Buffered messages come back in their original order.
    assert_eq!(next_frame(&mut rx).await.kind, "turn-a");
    assert_eq!(next_frame(&mut rx).await.kind, "turn-b");
}

#[tokio::test]
async fn replay_sends_head_of_backlog_immediately() {
    // Pacing long enough that a sleep-before-send would trip the frame
    // timeout below.
    let config = LobbyConfig {
        pacing: ReplayPacing { default_delay: Duration::from_secs(60), ..Default::default() },
        ..Default::default()
    };
    let lobby = start_lobby_with(config);
    let hero = PlayerId::from("hero");

    let (handle, mut rx) = connection(1, "hero", false);
    lobby.send(LobbyEvent::Register(handle));
    while next_frame(&mut rx).await.kind != kind::STATE_DIFF {}
    lobby.send(LobbyEvent::Deregister(ConnectionId(1)));
    drop(rx);

    lobby.broadcast(vec![hero.clone()], frame("turn-a"));
    lobby.broadcast(vec![hero.clone()], frame("turn-b"));

    let (handle, mut rx) = connection(2, "hero", true);
    lobby.send(LobbyEvent::Register(handle));
    while next_frame(&mut rx).await.kind != kind::PLAYER_STATUS {}

    // The pacing delay follows each message; the first one is not held.
    assert_eq!(next_frame(&mut rx).await.kind, "turn-a");
}

#[tokio::test]
async fn broadcast_all_is_untracked_fanout() {
    let lobby = start_lobby();

    let (a, mut rx_a) = connection(1, "a", false);
    let (b, mut rx_b) = connection(2, "b", false);
    lobby.send(LobbyEvent::Register(a));
    lobby.send(LobbyEvent::Register(b));

    // Skip each connection's status and diff traffic.
    while next_frame(&mut rx_a).await.kind != kind::STATE_DIFF {}
    while next_frame(&mut rx_b).await.kind != kind::STATE_DIFF {}

    lobby.broadcast_all(frame("announcement"));

    loop {
        let env = next_frame(&mut rx_a).await;
        if env.kind == "announcement" {
            assert_eq!(env.msg_num, 0);
            break;
        }
    }
    loop {
        let env = next_frame(&mut rx_b).await;
        if env.kind == "announcement" {
            assert_eq!(env.msg_num, 0);
            break;
        }
    }
}
