//! Tavern session broker server.
//!
//! Production glue around the sans-IO [`Lobby`] driver: Quinn for QUIC
//! transport, Tokio for the runtime, system time and crypto RNG via
//! [`SystemEnv`]. The lobby loop runs on one task and owns all broker
//! state; each connection runs a pump pair that talks to it through a
//! [`LobbyHandle`]. Actions the driver emits (retry timers, paced
//! replays) are executed here and fed back in as events.

#![forbid(unsafe_code)]

mod broadcast;
mod differ;
mod error;
mod lobby;
mod pump;
mod registry;
pub mod storage;
mod system_env;
mod transport;

pub use broadcast::{BroadcastEngine, PendingBroadcast};
pub use differ::StateDiffer;
pub use error::ServerError;
pub use lobby::{
    ConnectionHandle, Lobby, LobbyAction, LobbyConfig, LobbyEvent, LobbyHandle,
};
pub use pump::{ConnectionConfig, read_join, read_pump, write_pump};
pub use registry::PlayerRegistry;
pub use storage::{MemoryPlayerStore, PlayerStore, RedbPlayerStore, StoreError};
pub use system_env::SystemEnv;
use tavern_core::{ConnectionId, Environment, SequenceSource};
use tokio::sync::mpsc;
pub use transport::{QuinnConnection, QuinnTransport};

/// Configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g. "0.0.0.0:4433").
    pub bind_address: String,
    /// Path to a TLS certificate in PEM format.
    pub cert_path: Option<String>,
    /// Path to the TLS private key in PEM format.
    pub key_path: Option<String>,
    /// Coordination loop tunables.
    pub lobby: LobbyConfig,
    /// Per-connection tunables.
    pub connection: ConnectionConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            lobby: LobbyConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Production Tavern server: the lobby loop plus a QUIC accept loop.
pub struct Server {
    transport: QuinnTransport,
    lobby: LobbyHandle,
    env: SystemEnv,
    config: ServerRuntimeConfig,
}

impl Server {
    /// Bind the transport and start the lobby loop over the given store.
    pub fn bind<S: PlayerStore>(config: ServerRuntimeConfig, store: S) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let lobby_driver =
            Lobby::new(config.lobby.clone(), env.clone(), store, SequenceSource::new());
        let lobby = spawn_lobby(lobby_driver, env.clone());

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.clone(),
            config.key_path.clone(),
        )?;

        Ok(Self { transport, lobby, env, config })
    }

    /// Accept connections until the process dies.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server listening");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let lobby = self.lobby.clone();
                    let config = self.config.connection.clone();
                    let min_version = self.config.lobby.min_required_version;
                    let env = self.env.clone();

                    tokio::spawn(async move {
                        if let Err(error) =
                            handle_connection(conn, lobby, config, min_version, env).await
                        {
                            tracing::debug!(%error, "connection ended");
                        }
                    });
                },
                Err(error) => {
                    tracing::error!(%error, "accept failed");
                },
            }
        }
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Handle for enqueueing events from outside the accept loop.
    pub fn lobby(&self) -> &LobbyHandle {
        &self.lobby
    }
}

/// Start the lobby loop on its own task and return the handle everything
/// else uses to reach it.
pub fn spawn_lobby<E, S>(mut lobby: Lobby<E, S>, env: E) -> LobbyHandle
where
    E: Environment,
    S: PlayerStore,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = LobbyHandle::new(tx.clone(), lobby.sequence());

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            for action in lobby.handle_event(event) {
                execute_action(action, &tx, &env);
            }
        }
        tracing::info!("lobby loop stopped");
    });

    handle
}

/// Execute one driver action. Timers and replays get their own tasks so
/// the loop never sleeps.
fn execute_action<E: Environment>(
    action: LobbyAction,
    tx: &mpsc::UnboundedSender<LobbyEvent>,
    env: &E,
) {
    match action {
        LobbyAction::Enqueue(event) => {
            let _ = tx.send(event);
        },
        LobbyAction::ScheduleVerify { msg_num, after } => {
            let tx = tx.clone();
            let env = env.clone();
            tokio::spawn(async move {
                env.sleep(after).await;
                let _ = tx.send(LobbyEvent::VerifyBroadcast(msg_num));
            });
        },
        LobbyAction::Replay { player, items } => {
            let tx = tx.clone();
            let env = env.clone();
            tokio::spawn(async move {
                // Send first, pace after: the head of the backlog goes out
                // immediately so fresh traffic cannot overtake it.
                for (message, delay) in items {
                    let send = tx.send(LobbyEvent::Broadcast {
                        targets: vec![player.clone()],
                        payload: message.payload,
                        msg_num: message.msg_num,
                    });
                    if send.is_err() {
                        return;
                    }
                    env.sleep(delay).await;
                }
            });
        },
    }
}

/// Drive one client connection from handshake to teardown.
async fn handle_connection<E: Environment>(
    conn: QuinnConnection,
    lobby: LobbyHandle,
    config: ConnectionConfig,
    min_version: u32,
    env: E,
) -> Result<(), ServerError> {
    let (mut send, mut recv) = conn.accept_bi().await?;

    let join = pump::read_join(&mut recv, &config).await?;
    if join.version < min_version {
        conn.close(1u32.into(), b"client version too old");
        return Err(ServerError::Handshake(format!(
            "client version {} below minimum {min_version}",
            join.version
        )));
    }

    let conn_id = ConnectionId(env.random_u64());
    tracing::info!(conn = %conn_id, remote = %conn.remote_addr(), "connection established");

    let (sender, mut rx) = mpsc::channel(config.send_queue_capacity);
    lobby.send(LobbyEvent::Register(ConnectionHandle {
        id: conn_id,
        player_id: join.player_id,
        was_connected: join.was_connected,
        version: join.version,
        device_id: join.device_id,
        table_id: join.table_id,
        sender,
    }));

    let writer_conn = conn.clone();
    let write_config = config.clone();
    let writer = tokio::spawn(async move {
        let result = pump::write_pump(&mut send, &mut rx, &write_config).await;
        // Closing here makes the read pump error out, so teardown below
        // runs no matter which pump died first.
        writer_conn.close(0u32.into(), b"write side done");
        result
    });

    let read_result = pump::read_pump(&mut recv, conn_id, &lobby, &config).await;
    lobby.send(LobbyEvent::Deregister(conn_id));
    conn.close(0u32.into(), b"read side done");
    let _ = writer.await;

    read_result
}
