use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("query timed out")]
    Timeout,

    /// The routing table is empty; a lookup cannot even start.
    #[error("no nodes in routing table")]
    NoNodes,

    #[error("no free UDP port in the DHT range")]
    BindFailed,
}
