#![allow(dead_code)]

use reflex_duel::game::core::RoundState;
use reflex_duel::net::{
    ConnectionSession, ConnectionState, MemoryNetwork, MemoryTransport, Transport, WireMessage,
};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

pub type MemorySession = ConnectionSession<MemoryTransport>;

/// Fresh in-memory database with the schema applied. One connection, so every
/// query sees the same database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

/// Unique, not yet created directory under the system temp dir
pub fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "reflex-duel-{label}-{}-{nanos}",
        std::process::id()
    ))
}

pub async fn wait_for_state<T: Transport>(
    session: &ConnectionSession<T>,
    target: ConnectionState,
) {
    let mut states = session.subscribe_state();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"))
        .unwrap();
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Host listening at `host` on `network`, listener registered.
pub async fn hosting(network: &MemoryNetwork, address: &str) -> MemorySession {
    let session = ConnectionSession::new(network.transport(address).with_name(address));
    session.start_server().unwrap();
    wait_until(|| network.is_listening(address)).await;
    session
}

/// Host and client sessions, both connected.
pub async fn connected_pair(network: &MemoryNetwork) -> (MemorySession, MemorySession) {
    let host = hosting(network, "host").await;
    let client = ConnectionSession::new(network.transport("client"));
    client.connect_to_device("host").unwrap();

    wait_for_state(&host, ConnectionState::Connected).await;
    wait_for_state(&client, ConnectionState::Connected).await;
    (host, client)
}

pub async fn recv(messages: &mut broadcast::Receiver<WireMessage>) -> WireMessage {
    tokio::time::timeout(WAIT, messages.recv())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
}

pub async fn recv_snapshot(messages: &mut broadcast::Receiver<WireMessage>) -> RoundState {
    match recv(messages).await {
        WireMessage::StateSnapshot { state } => state,
        other => panic!("Expected StateSnapshot, got {:?}", other),
    }
}

/// A local port that was free a moment ago
pub fn free_tcp_port() -> u16 {
    let scratch = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    scratch.local_addr().unwrap().port()
}

pub fn free_udp_port() -> u16 {
    let scratch = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    scratch.local_addr().unwrap().port()
}
