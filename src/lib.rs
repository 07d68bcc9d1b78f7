//! undertow - a trackerless BitTorrent download engine
//!
//! The crate downloads content described by a `.torrent` file or a magnet
//! reference: it locates peers, speaks the peer wire protocol to a pool of
//! sessions, schedules pieces rarest-first, verifies and persists them,
//! and discovers peers without a tracker through a read-only Kademlia DHT.
//! When starting from a magnet it first fetches the info dictionary from
//! the swarm itself (BEP-9/10).
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode decoding and canonical encoding
//! - [`metainfo`] - info hashes, magnet links, info-dict and `.torrent` parsing
//! - [`peer`] - peer wire protocol, sessions, and the shared piece queue
//! - [`dht`] - BEP-5 DHT node: routing table, KRPC, iterative lookups
//! - [`storage`] - download state and the piece writer
//! - [`swarm`] - the coordinator tying everything together
//!
//! Tracker clients, configuration, and any user interface are external
//! collaborators: they feed peer addresses in and consume progress events.

pub mod bencode;
pub mod constants;
pub mod dht;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod swarm;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{DhtError, DhtServer, Node, NodeId, RoutingTable};
pub use metainfo::{InfoHash, MagnetLink, Metainfo, MetainfoError, SubFile, TorrentInfo};
pub use peer::{
    Bitfield, Handshake, Message, PeerError, PeerId, PeerSession, Piece, PieceQueue,
    SelectionStrategy,
};
pub use storage::{DownloadState, PieceWriter, StorageError};
pub use swarm::{
    download_magnet, download_torrent, CancelHandle, DownloadOptions, DownloadOutcome,
    ProgressCallback, ProgressEvent, SwarmCoordinator, SwarmError,
};
