use super::error::{SessionError, TransportError};
use super::protocol::{self, WireMessage};
use super::transport::{Listener, PeerDescriptor, SERVICE_ID, Transport};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Idle,
    Listening,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Host,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// The single link to the other device.
///
/// Created once per application and shared by cloning. Every command returns
/// immediately; listening, connecting, reading and writing happen in spawned
/// tasks. Any transport failure tears the link down to `Idle`.
pub struct ConnectionSession<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for ConnectionSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SessionInner<T: Transport> {
    transport: Arc<T>,
    state: watch::Sender<ConnectionState>,
    role: Mutex<Option<Role>>,
    link: Mutex<Link>,
    inbound: broadcast::Sender<WireMessage>,
    peers: DashMap<String, PeerDescriptor>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

/// Transport resources. Only present in the states that need them.
#[derive(Default)]
struct Link {
    /// Bumped on every open and every teardown; tasks act only on their own link
    epoch: u64,
    setup: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<WireMessage>>,
}

impl Link {
    fn release(&mut self) {
        // Reader first, so nothing is read from a half-released stream
        if let Some(task) = self.reader.take() {
            task.abort();
        }
        if let Some(task) = self.writer.take() {
            task.abort();
        }
        if let Some(task) = self.setup.take() {
            task.abort();
        }
        self.outbound = None;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Transport> Drop for SessionInner<T> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.discovery).take() {
            task.abort();
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> ConnectionSession<T> {
    pub fn new(transport: T) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                transport: Arc::new(transport),
                state,
                role: Mutex::new(None),
                link: Mutex::new(Link::default()),
                inbound,
                peers: DashMap::new(),
                discovery: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Decoded inbound messages, in arrival order.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<WireMessage> {
        self.inner.inbound.subscribe()
    }

    pub fn role(&self) -> Option<Role> {
        *lock(&self.inner.role)
    }

    /// Start hosting: listen, accept one peer, then stop listening.
    pub fn start_server(&self) -> Result<(), SessionError> {
        self.inner.check_available("host")?;

        let mut link = self.inner.lock_link();
        if self.state() != ConnectionState::Idle {
            warn!(state = ?self.state(), "Already hosting or connected, ignoring");
            return Ok(());
        }
        *lock(&self.inner.role) = Some(Role::Host);
        link.epoch += 1;
        let epoch = link.epoch;
        self.inner.state.send_replace(ConnectionState::Listening);
        link.setup = Some(tokio::spawn(accept_one(Arc::downgrade(&self.inner), epoch)));
        info!(epoch, "Hosting");
        Ok(())
    }

    /// Join a host at `address`. Stops discovery first.
    pub fn connect_to_device(&self, address: &str) -> Result<(), SessionError> {
        self.inner.check_available("connect")?;
        self.stop_discovery();

        let mut link = self.inner.lock_link();
        if self.state() != ConnectionState::Idle {
            warn!(state = ?self.state(), %address, "Already hosting or connected, ignoring");
            return Ok(());
        }
        *lock(&self.inner.role) = Some(Role::Client);
        link.epoch += 1;
        let epoch = link.epoch;
        self.inner.state.send_replace(ConnectionState::Connecting);
        link.setup = Some(tokio::spawn(dial(
            Arc::downgrade(&self.inner),
            epoch,
            address.to_string(),
        )));
        info!(epoch, %address, "Connecting");
        Ok(())
    }

    /// Queue a message for the peer. Returns false when there is no link.
    pub fn send(&self, message: WireMessage) -> bool {
        let link = self.inner.lock_link();
        match &link.outbound {
            Some(outbound) => outbound.send(message).is_ok(),
            None => {
                debug!(?message, "Not connected, dropping outbound message");
                false
            }
        }
    }

    /// Release everything and return to `Idle`. Safe to call at any time, any number of times.
    pub fn close_connection(&self) {
        self.inner.teardown(None, "closed locally");
    }

    pub fn start_discovery(&self) -> Result<(), SessionError> {
        self.inner.check_available("discover")?;

        let mut discovery = lock(&self.inner.discovery);
        if discovery.is_some() {
            debug!("Discovery already running");
            return Ok(());
        }
        self.inner.peers.clear();
        *discovery = Some(tokio::spawn(discover(Arc::downgrade(&self.inner))));
        info!("Discovery started");
        Ok(())
    }

    pub fn stop_discovery(&self) {
        self.inner.stop_discovery();
    }

    pub fn is_discovering(&self) -> bool {
        lock(&self.inner.discovery).is_some()
    }

    /// Peers seen so far, one per address.
    pub fn discovered_peers(&self) -> Vec<PeerDescriptor> {
        let mut peers: Vec<_> = self
            .inner
            .peers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        peers.sort_by(|a, b| a.address.cmp(&b.address));
        peers
    }
}

impl<T: Transport> SessionInner<T> {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        lock(&self.link)
    }

    fn check_available(&self, action: &str) -> Result<(), SessionError> {
        self.transport.ensure_available().map_err(|e| {
            warn!(error = %e, action, "Connectivity unavailable");
            SessionError::Unavailable(e)
        })
    }

    /// Tear down the link. With `expected` set, only if that link is still current.
    fn teardown(&self, expected: Option<u64>, reason: &str) {
        {
            let mut link = self.lock_link();
            if expected.is_some_and(|epoch| epoch != link.epoch) {
                return;
            }
            link.epoch += 1;
            link.release();
            let previous = self.state.send_replace(ConnectionState::Idle);
            if previous != ConnectionState::Idle {
                info!(?previous, reason, "Connection closed");
            }
        }
        self.stop_discovery();
    }

    fn stop_discovery(&self) {
        match lock(&self.discovery).take() {
            Some(task) => {
                task.abort();
                info!("Discovery stopped");
            }
            None => debug!("Discovery not running"),
        }
    }

    fn attach(self: &Arc<Self>, stream: T::Stream, epoch: u64) {
        let mut link = self.lock_link();
        if link.epoch != epoch {
            debug!(epoch, "Link was closed while opening, dropping stream");
            return;
        }
        // This runs on the setup task itself, which is about to finish
        link.setup = None;

        let (reader, writer) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        link.outbound = Some(outbound);
        link.reader = Some(tokio::spawn(read_loop(Arc::downgrade(self), epoch, reader)));
        link.writer = Some(tokio::spawn(write_loop(
            Arc::downgrade(self),
            epoch,
            writer,
            queue,
        )));
        self.state.send_replace(ConnectionState::Connected);
        info!(epoch, role = ?*lock(&self.role), "Peer connected");
    }
}

async fn accept_one<T: Transport>(session: Weak<SessionInner<T>>, epoch: u64) {
    let Some(transport) = session.upgrade().map(|inner| inner.transport.clone()) else {
        return;
    };

    let accepted: Result<T::Stream, TransportError> = async {
        let mut listener = transport.listen(SERVICE_ID).await?;
        listener.accept().await
        // Listener dropped here: one peer only
    }
    .await;

    let Some(inner) = session.upgrade() else { return };
    match accepted {
        Ok(stream) => inner.attach(stream, epoch),
        Err(e) => {
            warn!(error = %e, "Hosting failed");
            inner.teardown(Some(epoch), "listen failed");
        }
    }
}

async fn dial<T: Transport>(session: Weak<SessionInner<T>>, epoch: u64, address: String) {
    let Some(transport) = session.upgrade().map(|inner| inner.transport.clone()) else {
        return;
    };

    let connected = transport.connect(&address, SERVICE_ID).await;

    let Some(inner) = session.upgrade() else { return };
    match connected {
        Ok(stream) => inner.attach(stream, epoch),
        Err(e) => {
            warn!(error = %e, %address, "Connection failed");
            inner.teardown(Some(epoch), "connect failed");
        }
    }
}

async fn read_loop<T: Transport>(
    session: Weak<SessionInner<T>>,
    epoch: u64,
    reader: ReadHalf<T::Stream>,
) {
    let mut lines = BufReader::new(reader).split(b'\n');

    let reason = loop {
        let bytes = match lines.next_segment().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break "peer closed the stream",
            Err(e) => {
                warn!(error = %e, "Read failed");
                break "read failed";
            }
        };
        let Ok(line) = String::from_utf8(bytes) else {
            warn!("Dropping non UTF-8 line");
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        debug!(raw = %line, "Received line");
        let message = match protocol::decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(raw = %line, error = %e, "Dropping malformed message");
                continue;
            }
        };

        let Some(inner) = session.upgrade() else { return };
        // No subscribers is fine
        let _ = inner.inbound.send(message);
    };

    if let Some(inner) = session.upgrade() {
        inner.teardown(Some(epoch), reason);
    }
}

async fn write_loop<T: Transport>(
    session: Weak<SessionInner<T>>,
    epoch: u64,
    mut writer: WriteHalf<T::Stream>,
    mut queue: mpsc::UnboundedReceiver<WireMessage>,
) {
    while let Some(message) = queue.recv().await {
        let line = match protocol::encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, ?message, "Dropping unencodable message");
                continue;
            }
        };
        debug!(raw = %line.trim_end(), "Sending line");

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(error = %e, "Write failed");
            if let Some(inner) = session.upgrade() {
                inner.teardown(Some(epoch), "write failed");
            }
            return;
        }
    }
}

async fn discover<T: Transport>(session: Weak<SessionInner<T>>) {
    let Some(transport) = session.upgrade().map(|inner| inner.transport.clone()) else {
        return;
    };

    let mut found = match transport.discover(SERVICE_ID).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Discovery failed");
            if let Some(inner) = session.upgrade() {
                lock(&inner.discovery).take();
            }
            return;
        }
    };

    while let Some(peer) = found.recv().await {
        let Some(inner) = session.upgrade() else { return };
        if inner.peers.contains_key(&peer.address) {
            continue;
        }
        info!(address = %peer.address, name = ?peer.name, "Discovered peer");
        inner.peers.insert(peer.address.clone(), peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::MemoryNetwork;

    #[tokio::test]
    async fn close_is_idempotent_from_idle() {
        let session = ConnectionSession::new(MemoryNetwork::new().transport("a"));

        session.close_connection();
        session.close_connection();

        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.role(), None);
    }

    #[tokio::test]
    async fn start_server_records_host_role_and_listens() {
        let network = MemoryNetwork::new();
        let session = ConnectionSession::new(network.transport("host"));

        session.start_server().unwrap();

        assert_eq!(session.state(), ConnectionState::Listening);
        assert_eq!(session.role(), Some(Role::Host));
        session.close_connection();
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn unavailable_transport_fails_start_without_state_change() {
        let transport = MemoryNetwork::new().transport("host");
        transport.set_available(false);
        let session = ConnectionSession::new(transport);

        assert!(matches!(
            session.start_server(),
            Err(SessionError::Unavailable(_))
        ));
        assert!(session.connect_to_device("elsewhere").is_err());
        assert!(session.start_discovery().is_err());
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.role(), None);
    }

    #[tokio::test]
    async fn send_without_link_is_dropped() {
        let session = ConnectionSession::new(MemoryNetwork::new().transport("a"));
        assert!(!session.send(WireMessage::ResetGame));
    }

    #[tokio::test]
    async fn discovery_start_and_stop_are_tolerant() {
        let session = ConnectionSession::new(MemoryNetwork::new().transport("a"));

        session.stop_discovery();
        session.start_discovery().unwrap();
        session.start_discovery().unwrap();
        assert!(session.is_discovering());
        session.stop_discovery();
        session.stop_discovery();

        assert!(!session.is_discovering());
    }
}
