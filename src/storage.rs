//! Persistence: the on-disk download state and the piece writer.
//!
//! The writer owns the output file descriptors and maps verified pieces
//! onto the sub-files they overlap. The download state is the single
//! source of truth for "piece present on disk" and is snapshotted as JSON
//! under the OS cache directory so interrupted downloads can resume.

mod error;
mod state;
mod writer;

pub use error::StorageError;
pub use state::{cache_dir, state_dir, state_file, DownloadState};
pub use writer::PieceWriter;

#[cfg(test)]
mod tests;
