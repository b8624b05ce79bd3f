pub mod error;
pub mod protocol;
pub mod replication;
pub mod session;
pub mod transport;

pub use error::{ProtocolError, SessionError, TransportError};
pub use protocol::WireMessage;
pub use replication::{LinkEvent, ReplicationLink};
pub use session::{ConnectionSession, ConnectionState, Role};
pub use transport::{MemoryNetwork, MemoryTransport, PeerDescriptor, TcpTransport, Transport};
