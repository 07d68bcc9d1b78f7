//! Torrent metainfo handling (BEP-3, BEP-9).
//!
//! Covers info hashes, magnet links, info-dictionary parsing (also used by
//! the trackerless metadata fetch) and `.torrent` file parsing. The
//! info-hash is always SHA-1 over the info value's bytes as they appear in
//! the source buffer; values are never re-encoded for hashing.

mod error;
mod info;
mod info_hash;
mod magnet;
mod torrent;

pub use error::MetainfoError;
pub use info::{SubFile, TorrentInfo};
pub use info_hash::InfoHash;
pub use magnet::MagnetLink;
pub use torrent::Metainfo;
