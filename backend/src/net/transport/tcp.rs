use super::{Listener, PeerDescriptor, Transport};
use crate::net::error::TransportError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const BEACON_INTERVAL: Duration = Duration::from_secs(1);
const MAX_BEACON_LEN: usize = 1024;
const PEER_QUEUE: usize = 32;

/// Game stream over TCP, discovery over UDP beacons.
///
/// While a listener is open the host announces itself once per second on
/// the discovery port. Discovering peers bind that port and collect the
/// beacons that name the same service.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_host: String,
    port: u16,
    discovery_port: u16,
    beacon_target: SocketAddr,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Beacon {
    service: String,
    name: String,
    port: u16,
}

impl TcpTransport {
    pub fn new(port: u16, discovery_port: u16, name: impl Into<String>) -> Self {
        Self {
            bind_host: Ipv4Addr::UNSPECIFIED.to_string(),
            port,
            discovery_port,
            beacon_target: SocketAddr::from((Ipv4Addr::BROADCAST, discovery_port)),
            name: name.into(),
        }
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Send beacons somewhere other than the LAN broadcast address.
    pub fn with_beacon_target(mut self, target: SocketAddr) -> Self {
        self.beacon_target = target;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn resolve(&self, address: &str) -> String {
        if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{}", self.port)
        }
    }
}

pub struct TcpServiceListener {
    listener: TcpListener,
    beacon: JoinHandle<()>,
}

impl TcpServiceListener {
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Drop for TcpServiceListener {
    fn drop(&mut self) {
        self.beacon.abort();
    }
}

impl Listener for TcpServiceListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<TcpStream, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "Accepted peer");
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpServiceListener;

    fn ensure_available(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn listen(&self, service: &str) -> Result<TcpServiceListener, TransportError> {
        let listener = TcpListener::bind((self.bind_host.as_str(), self.port)).await?;
        let local = listener.local_addr()?;
        info!(%local, service, "Listening for a peer");

        let beacon = Beacon {
            service: service.to_string(),
            name: self.name.clone(),
            port: local.port(),
        };
        let payload = serde_json::to_vec(&beacon).map_err(std::io::Error::other)?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        let target = self.beacon_target;

        let beacon = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BEACON_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&payload, target).await {
                    debug!(error = %e, %target, "Beacon send failed");
                }
            }
        });

        Ok(TcpServiceListener { listener, beacon })
    }

    async fn connect(&self, address: &str, _service: &str) -> Result<TcpStream, TransportError> {
        let target = self.resolve(address);
        info!(address = %target, "Connecting to peer");
        let stream = TcpStream::connect(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                TransportError::UnknownPeer(target.clone())
            } else {
                TransportError::Io(e)
            }
        })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn discover(
        &self,
        service: &str,
    ) -> Result<mpsc::Receiver<PeerDescriptor>, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.discovery_port)).await?;
        let (tx, rx) = mpsc::channel(PEER_QUEUE);
        let service = service.to_string();
        info!(port = self.discovery_port, %service, "Listening for beacons");

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_BEACON_LEN];
            loop {
                let received = tokio::select! {
                    _ = tx.closed() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                let (len, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "Discovery socket failed");
                        break;
                    }
                };
                let beacon: Beacon = match serde_json::from_slice(&buf[..len]) {
                    Ok(beacon) => beacon,
                    Err(_) => {
                        debug!(%from, "Ignoring non-beacon datagram");
                        continue;
                    }
                };
                if beacon.service != service {
                    continue;
                }
                let peer = PeerDescriptor {
                    address: SocketAddr::new(from.ip(), beacon.port).to_string(),
                    name: Some(beacon.name),
                };
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

    #[test]
    fn bare_host_gets_default_port() {
        let transport = TcpTransport::new(47800, 47801, "test");
        assert_eq!(transport.resolve("192.168.1.4"), "192.168.1.4:47800");
        assert_eq!(transport.resolve("192.168.1.4:9000"), "192.168.1.4:9000");
    }

    #[test]
    fn beacon_is_plain_json() {
        let beacon = Beacon {
            service: "reflex-duel".to_string(),
            name: "den".to_string(),
            port: 47800,
        };
        let json = serde_json::to_string(&beacon).unwrap();
        assert_eq!(json, r#"{"service":"reflex-duel","name":"den","port":47800}"#);
    }

    #[tokio::test]
    async fn refused_connection_is_unknown_peer() {
        let scratch = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = scratch.local_addr().unwrap().port();
        drop(scratch);
        let transport = TcpTransport::new(port, 0, "test");

        let err = transport
            .connect(&format!("127.0.0.1:{port}"), "reflex-duel")
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }
}
