use super::error::TransportError;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

pub mod memory;
pub mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

/// Fixed identifier both sides agree on before talking.
pub const SERVICE_ID: &str = "reflex-duel";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerDescriptor {
    pub address: String,
    pub name: Option<String>,
}

/// An open listening endpoint. Dropping it stops listening.
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn accept(&mut self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

/// A way of reaching the other device: TCP on a LAN, in-process pipes in tests.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    type Listener: Listener<Stream = Self::Stream>;

    /// Fails when the capability is missing entirely.
    fn ensure_available(&self) -> Result<(), TransportError>;

    fn listen(
        &self,
        service: &str,
    ) -> impl Future<Output = Result<Self::Listener, TransportError>> + Send;

    fn connect(
        &self,
        address: &str,
        service: &str,
    ) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;

    /// Peers offering `service`, as they are found. Dropping the receiver ends discovery.
    fn discover(
        &self,
        service: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<PeerDescriptor>, TransportError>> + Send;
}
