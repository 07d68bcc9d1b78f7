//! Peer wire protocol (BEP-3, BEP-9, BEP-10).
//!
//! One session per remote peer: handshake, the remote's bitfield, pipelined
//! piece requests, and the ut_metadata exchange used when starting from a
//! magnet reference. Piece selection lives in [`PieceQueue`], shared by all
//! sessions of a swarm.

mod bitfield;
mod error;
mod extension;
mod message;
mod metadata;
mod peer_id;
mod queue;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use extension::ExtensionHandshake;
pub use message::{Handshake, Message, MessageId};
pub use metadata::MetadataMessage;
pub use peer_id::PeerId;
pub use queue::{Piece, PieceQueue, SelectionStrategy};
pub use session::PeerSession;
pub use transport::PeerTransport;

#[cfg(test)]
mod tests;
