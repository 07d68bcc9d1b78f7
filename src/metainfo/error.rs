use crate::bencode::BencodeError;
use thiserror::Error;

/// Errors raised while parsing metainfo, magnet links, or info dictionaries.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("invalid metainfo: {0}")]
    Invalid(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid magnet link: {0}")]
    InvalidMagnet(String),

    /// Info hash is not 20 bytes or not valid hex/base32.
    #[error("invalid info hash")]
    InvalidInfoHash,

    /// Assembled metadata does not hash to the expected info hash.
    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
