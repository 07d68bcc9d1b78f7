use thiserror::Error;

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a malformed handshake.
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The handshake carried a different info hash than ours.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// A malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An unknown message type byte.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// A read or write deadline expired.
    #[error("timeout")]
    Timeout,

    /// The peer choked us while requests were outstanding; the piece goes
    /// back to the queue and the session may continue.
    #[error("choked with requests in flight")]
    Choked,

    /// Protocol violation; the session is terminated.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Extension protocol error.
    #[error("extension error: {0}")]
    Extension(String),

    /// The peer does not offer ut_metadata or advertised no metadata size.
    #[error("peer offers no metadata exchange")]
    NoMetadataSupport,

    /// Assembled metadata failed SHA-1 verification against the info hash.
    #[error("metadata hash mismatch")]
    MetadataMismatch,

    /// Bencode error inside an extension payload.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}
