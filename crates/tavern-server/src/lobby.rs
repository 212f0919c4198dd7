//! Lobby coordination loop.
//!
//! The [`Lobby`] is a sans-IO driver for the whole broker: events go in,
//! actions come out, all state mutation happens inside `handle_event` on a
//! single task. It owns the session registry, the broadcast engine, and
//! the state differ outright, so none of them need locks. Anything
//! involving real time (retry timers, replay pacing) is expressed as a
//! [`LobbyAction`] and executed by the runtime glue, which feeds the
//! result back in as another event.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use tavern_core::{ConnectionId, Environment, MissedMessage, ReplayPacing, SequenceSource};
use tavern_proto::{Envelope, PlayerId, PlayerStatus, kind};
use tokio::sync::{mpsc, oneshot};

use crate::{
    broadcast::BroadcastEngine, differ::StateDiffer, registry::PlayerRegistry,
    storage::PlayerStore,
};

/// Tunables for the coordination loop.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long to wait for acknowledgments before re-broadcasting.
    pub ack_timeout: Duration,
    /// Minimum client protocol version accepted at handshake.
    pub min_required_version: u32,
    /// Inter-message delays for missed-message replay.
    pub pacing: ReplayPacing,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            min_required_version: 0,
            pacing: ReplayPacing::default(),
        }
    }
}

/// The loop's view of one live connection: identity metadata from the
/// join handshake plus the sending half of the connection's outbound
/// queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Transport-level connection identity.
    pub id: ConnectionId,
    /// Resolved player identity; `None` only between handshake and
    /// registration.
    pub player_id: Option<PlayerId>,
    /// The client claims it was previously connected.
    pub was_connected: bool,
    /// Client protocol version from the handshake.
    pub version: u32,
    /// Device identifier claimed at handshake, for identity recovery.
    pub device_id: Option<String>,
    /// Table the client believes it was seated at.
    pub table_id: Option<String>,
    /// Outbound queue feeding the connection's write pump.
    pub sender: mpsc::Sender<Bytes>,
}

/// Everything that can happen to the lobby. One queue, one consumer.
#[derive(Debug)]
pub enum LobbyEvent {
    /// A connection finished its handshake and wants in.
    Register(ConnectionHandle),
    /// A connection is gone (transport closed, queue overflow, pump
    /// error). Idempotent.
    Deregister(ConnectionId),
    /// A registered connection belongs to a player that was already live;
    /// decide between replay and abandonment.
    ReconnectHandoff(ConnectionId),
    /// Inbound application frame from a connection.
    Action {
        /// Envelope kind.
        name: String,
        /// Encoded envelope bytes.
        payload: Bytes,
        /// Originating connection.
        from: ConnectionId,
        /// Delivery sequence number the reader pump stamped.
        msg_num: u64,
    },
    /// A connection acknowledged a tracked message.
    Ack {
        /// Acknowledging connection.
        from: ConnectionId,
        /// Sequence number being acknowledged.
        msg_num: u64,
    },
    /// Deliver a payload to specific players, tracked when `msg_num` is
    /// non-zero.
    Broadcast {
        /// Players to deliver to.
        targets: Vec<PlayerId>,
        /// Encoded envelope bytes.
        payload: Bytes,
        /// Sequence number; 0 disables tracking.
        msg_num: u64,
    },
    /// Fire-and-forget delivery to every live connection.
    BroadcastAll(Bytes),
    /// Ack timeout fired for a tracked broadcast.
    VerifyBroadcast(u64),
    /// Collect and broadcast the accumulated state diff.
    TriggerDiff,
    /// Arm a session's reconnection handoff slot.
    WaitForPlayer {
        /// Player whose next registration fulfills the slot.
        player_id: PlayerId,
        /// Receives the reconnecting connection's ID.
        waiter: oneshot::Sender<ConnectionId>,
    },
}

/// What the loop asks its runtime to do. Everything async lives here.
#[derive(Debug)]
pub enum LobbyAction {
    /// Feed this event back into the loop's own queue.
    Enqueue(LobbyEvent),
    /// After `after`, feed `VerifyBroadcast(msg_num)` back in.
    ScheduleVerify {
        /// Tracked broadcast to verify.
        msg_num: u64,
        /// Ack timeout.
        after: Duration,
    },
    /// Re-deliver buffered messages to a reconnected player, one at a
    /// time, pausing for each item's delay after sending it.
    Replay {
        /// Reconnected player.
        player: PlayerId,
        /// Messages in original delivery order, each with the pacing
        /// delay that follows it.
        items: Vec<(MissedMessage, Duration)>,
    },
}

/// The coordination loop driver.
pub struct Lobby<E: Environment, S: PlayerStore> {
    config: LobbyConfig,
    env: E,
    store: S,
    seq: SequenceSource,
    registry: PlayerRegistry,
    broadcasts: BroadcastEngine,
    differ: StateDiffer,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl<E: Environment, S: PlayerStore> Lobby<E, S> {
    /// A fresh driver with no sessions, games, or connections.
    pub fn new(config: LobbyConfig, env: E, store: S, seq: SequenceSource) -> Self {
        Self {
            config,
            env,
            store,
            seq,
            registry: PlayerRegistry::new(),
            broadcasts: BroadcastEngine::new(),
            differ: StateDiffer::new(),
            connections: HashMap::new(),
        }
    }

    /// Register a game before the loop starts.
    pub fn register_game(
        &mut self,
        name: impl Into<String>,
        game: Box<dyn tavern_core::TurnBasedGame>,
    ) {
        self.registry.register_game(name, game);
    }

    /// Read-only view of the session registry.
    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    /// The delivery sequence source, shared with [`LobbyHandle`]s and
    /// read pumps.
    pub fn sequence(&self) -> SequenceSource {
        self.seq.clone()
    }

    /// Process one event, returning the actions the runtime must execute.
    pub fn handle_event(&mut self, event: LobbyEvent) -> Vec<LobbyAction> {
        let mut actions = Vec::new();
        match event {
            LobbyEvent::Register(handle) => self.handle_register(handle, &mut actions),
            LobbyEvent::Deregister(conn) => self.handle_deregister(conn),
            LobbyEvent::ReconnectHandoff(conn) => self.handle_handoff(conn, &mut actions),
            LobbyEvent::Action { name, payload, from, msg_num } => {
                self.handle_action(&name, payload, from, msg_num, &mut actions);
            },
            LobbyEvent::Ack { from, msg_num } => self.handle_ack(from, msg_num),
            LobbyEvent::Broadcast { targets, payload, msg_num } => {
                self.handle_broadcast(&targets, &payload, msg_num, &mut actions);
            },
            LobbyEvent::BroadcastAll(payload) => self.handle_broadcast_all(&payload, &mut actions),
            LobbyEvent::VerifyBroadcast(msg_num) => self.handle_verify(msg_num, &mut actions),
            LobbyEvent::TriggerDiff => self.handle_trigger_diff(&mut actions),
            LobbyEvent::WaitForPlayer { player_id, waiter } => {
                self.handle_wait_for_player(player_id, waiter);
            },
        }
        actions
    }

    fn handle_register(&mut self, mut handle: ConnectionHandle, actions: &mut Vec<LobbyAction>) {
        let (player_id, found) = self.registry.resolve(
            &self.store,
            &self.env,
            handle.player_id.take(),
            handle.device_id.as_deref(),
        );
        tracing::info!(conn = %handle.id, player = %player_id, found, "connection registered");

        handle.player_id = Some(player_id.clone());
        let conn = handle.id;
        self.connections.insert(conn, handle);

        if found {
            actions.push(LobbyAction::Enqueue(LobbyEvent::ReconnectHandoff(conn)));
        }

        let Some(session) = self.registry.session(&player_id) else {
            return;
        };
        let status = PlayerStatus { player: session.record.clone(), found_in_lobby: found };
        match Envelope::new(kind::PLAYER_STATUS, 0, &status).and_then(|e| e.encode()) {
            Ok(payload) => self.deliver(&player_id, &payload, 0, actions),
            Err(error) => tracing::error!(%error, "failed to encode player status"),
        }

        if !found {
            actions.push(LobbyAction::Enqueue(LobbyEvent::TriggerDiff));
        }
    }

    fn handle_deregister(&mut self, conn: ConnectionId) {
        // Dropping the handle drops the queue sender, which lets the write
        // pump drain and exit. The player session stays.
        if let Some(handle) = self.connections.remove(&conn) {
            tracing::info!(%conn, player = ?handle.player_id, "connection deregistered");
        }
    }

    fn handle_handoff(&mut self, conn: ConnectionId, actions: &mut Vec<LobbyAction>) {
        let Some(handle) = self.connections.get(&conn) else {
            return;
        };
        let was_connected = handle.was_connected;
        let Some(player) = handle.player_id.clone() else {
            return;
        };
        let Some(session) = self.registry.session_mut(&player) else {
            return;
        };

        session.fulfill_handoff(conn);
        let missed = std::mem::take(&mut session.missed);

        if was_connected {
            if !missed.is_empty() {
                tracing::debug!(%player, count = missed.len(), "replaying missed messages");
                let pacing = &self.config.pacing;
                let items = missed
                    .into_iter()
                    .map(|m| {
                        // Unparseable payloads pace at the default rate.
                        let delay = match Envelope::decode(&m.payload) {
                            Ok(env) => pacing.delay_for(&env.kind),
                            Err(_) => pacing.default_delay,
                        };
                        (m, delay)
                    })
                    .collect();
                actions.push(LobbyAction::Replay { player, items });
            }
        } else {
            // The client does not remember being here: whatever it was in
            // the middle of is abandoned.
            session.to_ack.clear();
            self.registry.exclude_from_all_games(&player);
            self.differ.push_removed(player);
        }
    }

    fn handle_action(
        &mut self,
        name: &str,
        _payload: Bytes,
        from: ConnectionId,
        msg_num: u64,
        actions: &mut Vec<LobbyAction>,
    ) {
        match name {
            kind::LOBBY_INFO => {
                let info = self.registry.lobby_info();
                match Envelope::new(kind::LOBBY_INFO, 0, &info).and_then(|e| e.encode()) {
                    Ok(reply) => self.send_to_connection(from, &reply, actions),
                    Err(error) => tracing::error!(%error, "failed to encode lobby info"),
                }
            },
            other => {
                tracing::debug!(name = other, %from, msg_num, "dropping unhandled action");
            },
        }
    }

    fn handle_ack(&mut self, from: ConnectionId, msg_num: u64) {
        let Some(player) = self.connections.get(&from).and_then(|h| h.player_id.clone()) else {
            return;
        };
        if let Some(session) = self.registry.session_mut(&player) {
            session.to_ack.remove(&msg_num);
        }
        if self.broadcasts.acknowledge(msg_num, &player) {
            tracing::debug!(msg_num, "broadcast fully acknowledged");
        }
    }

    fn handle_broadcast(
        &mut self,
        targets: &[PlayerId],
        payload: &Bytes,
        msg_num: u64,
        actions: &mut Vec<LobbyAction>,
    ) {
        if msg_num != 0 {
            self.broadcasts.track(targets.to_vec(), payload.clone(), msg_num);
            actions.push(LobbyAction::ScheduleVerify { msg_num, after: self.config.ack_timeout });
        }
        for player in targets {
            self.deliver(player, payload, msg_num, actions);
        }
    }

    fn handle_broadcast_all(&mut self, payload: &Bytes, actions: &mut Vec<LobbyAction>) {
        let conns: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn in conns {
            self.send_to_connection(conn, payload, actions);
        }
    }

    fn handle_verify(&mut self, msg_num: u64, actions: &mut Vec<LobbyAction>) {
        // Entry already retired means everyone acked in time.
        let Some(entry) = self.broadcasts.pending(msg_num) else {
            return;
        };
        tracing::debug!(msg_num, "ack timeout, re-broadcasting");
        actions.push(LobbyAction::Enqueue(LobbyEvent::Broadcast {
            targets: entry.targets.clone(),
            payload: entry.payload.clone(),
            msg_num,
        }));
    }

    fn handle_trigger_diff(&mut self, actions: &mut Vec<LobbyAction>) {
        let Some(diff) = self.differ.diff(&mut self.registry) else {
            return;
        };
        // Diffs are presence gossip for whoever is listening right now.
        // Untracked fan-out: an offline player has nothing useful to do
        // with a stale diff, and a reconnecting client refreshes from
        // lobby_info anyway.
        match Envelope::new(kind::STATE_DIFF, 0, &diff).and_then(|e| e.encode()) {
            Ok(payload) => {
                actions.push(LobbyAction::Enqueue(LobbyEvent::BroadcastAll(payload)));
            },
            Err(error) => tracing::error!(%error, "failed to encode state diff"),
        }
    }

    fn handle_wait_for_player(&mut self, player: PlayerId, waiter: oneshot::Sender<ConnectionId>) {
        match self.registry.session_mut(&player) {
            // Replacing an armed slot drops the previous waiter, which
            // reads as cancellation on its receiver.
            Some(session) => session.handoff = Some(waiter),
            None => tracing::debug!(%player, "wait requested for unknown player"),
        }
    }

    /// Deliver a payload to every connection of one player, or buffer it
    /// for replay when the player is offline or its queue is full.
    fn deliver(
        &mut self,
        player: &PlayerId,
        payload: &Bytes,
        msg_num: u64,
        actions: &mut Vec<LobbyAction>,
    ) {
        let conns: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, h)| h.player_id.as_ref() == Some(player))
            .map(|(id, _)| *id)
            .collect();

        if conns.is_empty() {
            self.buffer_missed(player, payload, msg_num);
            return;
        }

        for conn in conns {
            let Some(handle) = self.connections.get(&conn) else {
                continue;
            };
            match handle.sender.try_send(payload.clone()) {
                Ok(()) => {
                    if msg_num != 0 {
                        if let Some(session) = self.registry.session_mut(player) {
                            session.to_ack.insert(msg_num);
                        }
                    }
                },
                Err(_) => {
                    // Full or closed queue means the connection cannot
                    // keep up; cut it loose and keep the message for
                    // replay.
                    tracing::warn!(%conn, %player, "outbound queue rejected frame, evicting connection");
                    self.buffer_missed(player, payload, msg_num);
                    actions.push(LobbyAction::Enqueue(LobbyEvent::Deregister(conn)));
                },
            }
        }
    }

    fn send_to_connection(
        &mut self,
        conn: ConnectionId,
        payload: &Bytes,
        actions: &mut Vec<LobbyAction>,
    ) {
        let Some(handle) = self.connections.get(&conn) else {
            return;
        };
        if handle.sender.try_send(payload.clone()).is_err() {
            tracing::warn!(%conn, "outbound queue rejected frame, evicting connection");
            actions.push(LobbyAction::Enqueue(LobbyEvent::Deregister(conn)));
        }
    }

    fn buffer_missed(&mut self, player: &PlayerId, payload: &Bytes, msg_num: u64) {
        if msg_num == 0 {
            return;
        }
        let Some(session) = self.registry.session_mut(player) else {
            return;
        };
        // A retry may fire while the player is still offline; one buffer
        // entry per sequence number.
        if session.missed.iter().any(|m| m.msg_num == msg_num) {
            return;
        }
        session.missed.push(MissedMessage { payload: payload.clone(), msg_num });
        session.to_ack.insert(msg_num);
    }
}

/// Cloneable sender side of the loop: sync enqueue from any task.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    tx: mpsc::UnboundedSender<LobbyEvent>,
    seq: SequenceSource,
}

impl LobbyHandle {
    /// Wrap the loop's queue sender and its sequence source.
    pub fn new(tx: mpsc::UnboundedSender<LobbyEvent>, seq: SequenceSource) -> Self {
        Self { tx, seq }
    }

    /// Enqueue an event. Silently dropped when the loop has shut down.
    pub fn send(&self, event: LobbyEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("lobby loop is gone, dropping event");
        }
    }

    /// Reliable broadcast: assigns the delivery sequence number and
    /// returns it.
    pub fn broadcast(&self, targets: Vec<PlayerId>, payload: Bytes) -> u64 {
        let msg_num = self.seq.next();
        self.send(LobbyEvent::Broadcast { targets, payload, msg_num });
        msg_num
    }

    /// Fire-and-forget delivery to every live connection.
    pub fn broadcast_all(&self, payload: Bytes) {
        self.send(LobbyEvent::BroadcastAll(payload));
    }

    /// Arm the player's handoff slot and return the receiving end. The
    /// receiver errors out if the slot is re-armed or the session
    /// disappears; the caller owns any timeout.
    pub fn await_reconnect(&self, player_id: PlayerId) -> oneshot::Receiver<ConnectionId> {
        let (waiter, rx) = oneshot::channel();
        self.send(LobbyEvent::WaitForPlayer { player_id, waiter });
        rx
    }

    /// The delivery sequence source shared with the read pumps.
    pub fn sequence(&self) -> SequenceSource {
        self.seq.clone()
    }
}
