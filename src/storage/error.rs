use thiserror::Error;

/// Errors from the writer and state persistence.
///
/// Write failures abort the download; everything else on this path is
/// recoverable by re-queuing the piece.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid piece index {0}")]
    InvalidPiece(usize),

    /// A piece's sub-file spans do not cover its byte range exactly.
    #[error("piece {index} covers {covered} of {expected} bytes")]
    SpanMismatch {
        index: usize,
        covered: usize,
        expected: usize,
    },
}
