use super::{Listener, PeerDescriptor, Transport};
use crate::net::error::TransportError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const PIPE_CAPACITY: usize = 64 * 1024;
const ANNOUNCE_CAPACITY: usize = 16;
const PEER_QUEUE: usize = 32;

struct Endpoint {
    service: String,
    name: Option<String>,
    incoming: mpsc::Sender<DuplexStream>,
}

struct NetworkInner {
    endpoints: DashMap<String, Endpoint>,
    /// (service, peer) for every new listener
    announcements: broadcast::Sender<(String, PeerDescriptor)>,
}

impl Default for NetworkInner {
    fn default() -> Self {
        Self {
            endpoints: DashMap::new(),
            announcements: broadcast::channel(ANNOUNCE_CAPACITY).0,
        }
    }
}

/// Shared switchboard that in-process transports listen and dial on.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport reachable at `address` on this network.
    pub fn transport(&self, address: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            address: address.into(),
            name: None,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_listening(&self, address: &str) -> bool {
        self.inner.endpoints.contains_key(address)
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: String,
    name: Option<String>,
    available: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Simulate the capability being switched off. Shared by clones.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

pub struct MemoryListener {
    network: MemoryNetwork,
    address: String,
    incoming: mpsc::Receiver<DuplexStream>,
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.inner.endpoints.remove(&self.address);
        debug!(address = %self.address, "Memory listener closed");
    }
}

impl Listener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> Result<DuplexStream, TransportError> {
        self.incoming.recv().await.ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "listener closed",
            ))
        })
    }
}

impl Transport for MemoryTransport {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "memory transport {} is switched off",
                self.address
            )))
        }
    }

    async fn listen(&self, service: &str) -> Result<MemoryListener, TransportError> {
        self.ensure_available()?;
        let (tx, rx) = mpsc::channel(1);

        match self.network.inner.endpoints.entry(self.address.clone()) {
            Entry::Occupied(_) => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("{} is already listening", self.address),
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Endpoint {
                    service: service.to_string(),
                    name: self.name.clone(),
                    incoming: tx,
                });
            }
        }

        let peer = PeerDescriptor {
            address: self.address.clone(),
            name: self.name.clone(),
        };
        let _ = self
            .network
            .inner
            .announcements
            .send((service.to_string(), peer));

        Ok(MemoryListener {
            network: self.network.clone(),
            address: self.address.clone(),
            incoming: rx,
        })
    }

    async fn connect(&self, address: &str, service: &str) -> Result<DuplexStream, TransportError> {
        self.ensure_available()?;
        let incoming = {
            let endpoint = self
                .network
                .inner
                .endpoints
                .get(address)
                .ok_or_else(|| TransportError::UnknownPeer(address.to_string()))?;
            if endpoint.service != service {
                return Err(TransportError::ServiceMismatch {
                    address: address.to_string(),
                    expected: service.to_string(),
                    found: endpoint.service.clone(),
                });
            }
            endpoint.incoming.clone()
        };

        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        incoming
            .send(theirs)
            .await
            .map_err(|_| TransportError::UnknownPeer(address.to_string()))?;
        Ok(ours)
    }

    async fn discover(
        &self,
        service: &str,
    ) -> Result<mpsc::Receiver<PeerDescriptor>, TransportError> {
        self.ensure_available()?;
        let mut announcements = self.network.inner.announcements.subscribe();
        let (tx, rx) = mpsc::channel(PEER_QUEUE);

        let existing: Vec<PeerDescriptor> = self
            .network
            .inner
            .endpoints
            .iter()
            .filter(|e| e.key() != &self.address && e.value().service == service)
            .map(|e| PeerDescriptor {
                address: e.key().clone(),
                name: e.value().name.clone(),
            })
            .collect();
        for peer in existing {
            // Queue is sized for far more listeners than a test creates
            let _ = tx.try_send(peer);
        }

        let service = service.to_string();
        let own_address = self.address.clone();
        tokio::spawn(async move {
            loop {
                let announced = tokio::select! {
                    _ = tx.closed() => break,
                    announced = announcements.recv() => announced,
                };
                let (announced_service, peer) = match announced {
                    Ok(announced) => announced,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if announced_service != service || peer.address == own_address {
                    continue;
                }
                if tx.send(peer).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn connect_reaches_listener_and_pipes_bytes() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");
        let client = network.transport("client");

        let mut listener = host.listen("svc").await.unwrap();
        let mut outgoing = client.connect("host", "svc").await.unwrap();
        let mut incoming = listener.accept().await.unwrap();

        outgoing.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        incoming.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn dropping_listener_unregisters_address() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");

        let listener = host.listen("svc").await.unwrap();
        assert!(network.is_listening("host"));
        drop(listener);

        assert!(!network.is_listening("host"));
        let err = network.transport("c").connect("host", "svc").await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn wrong_service_is_rejected() {
        let network = MemoryNetwork::new();
        let _listener = network.transport("host").listen("svc").await.unwrap();

        let err = network
            .transport("c")
            .connect("host", "other")
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::ServiceMismatch { .. }));
    }

    #[tokio::test]
    async fn unavailable_transport_refuses_everything() {
        let network = MemoryNetwork::new();
        let transport = network.transport("host");
        transport.set_available(false);

        assert!(matches!(
            transport.ensure_available(),
            Err(TransportError::Unavailable(_))
        ));
        assert!(transport.listen("svc").await.is_err());
        assert!(transport.discover("svc").await.is_err());
    }

    #[tokio::test]
    async fn discover_sees_existing_and_new_listeners() {
        let network = MemoryNetwork::new();
        let _early = network
            .transport("early")
            .with_name("Early")
            .listen("svc")
            .await
            .unwrap();
        let _other = network.transport("other").listen("nope").await.unwrap();

        let mut peers = network.transport("seeker").discover("svc").await.unwrap();
        let _late = network.transport("late").listen("svc").await.unwrap();

        let first = peers.recv().await.unwrap();
        assert_eq!(first.address, "early");
        assert_eq!(first.name.as_deref(), Some("Early"));
        let second = peers.recv().await.unwrap();
        assert_eq!(second.address, "late");
        assert_eq!(second.name, None);
    }
}
