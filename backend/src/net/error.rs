use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider cannot be used at all (radio off, no permission, disabled)
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no peer listening at {0}")]
    UnknownPeer(String),
    #[error("peer at {address} offers service {found}, expected {expected}")]
    ServiceMismatch {
        address: String,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connectivity unavailable")]
    Unavailable(#[source] TransportError),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode message")]
    Encode(#[source] serde_json::Error),
}
