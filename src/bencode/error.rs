use thiserror::Error;

/// Errors raised while decoding bencode.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Malformed integer: empty, leading zeros, or out of range.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte-string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidLength,

    /// A byte that cannot start or continue a value at this position.
    #[error("unexpected byte 0x{0:02x}")]
    UnexpectedByte(u8),

    /// Dictionary key is not a byte string.
    #[error("dictionary key is not a string")]
    NonStringKey,

    /// Extra bytes after the value.
    #[error("trailing data after value")]
    TrailingData,

    /// Nesting depth limit exceeded.
    #[error("nesting too deep")]
    TooDeep,
}
