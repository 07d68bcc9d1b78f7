use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use super::error::StorageError;
use super::state::DownloadState;
use crate::metainfo::{SubFile, TorrentInfo};

/// One output file plus how many of its bytes are still missing. The
/// descriptor is closed as soon as the counter reaches zero.
struct FileSlot {
    entry: SubFile,
    file: Option<File>,
    remaining: u64,
}

/// Where a slice of a piece lands on disk.
struct Span {
    slot: usize,
    file_offset: u64,
    buf_offset: usize,
    length: usize,
}

/// Maps verified pieces onto sub-files and performs positional writes.
///
/// The writer is the only component touching the output files; the
/// coordinator drives it single-threaded, so plain seek + write is safe.
pub struct PieceWriter {
    root: PathBuf,
    slots: Vec<FileSlot>,
    piece_length: usize,
    piece_count: usize,
    total_length: u64,
}

impl PieceWriter {
    /// Creates (or reopens, when resuming) every sub-file under `root` and
    /// preallocates each by writing a zero byte at its final offset.
    pub async fn open(root: &Path, info: &TorrentInfo) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(root).await?;

        let mut slots = Vec::with_capacity(info.files.len());
        for entry in &info.files {
            let path = root.join(&entry.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .await?;

            if entry.length > 0 && file.metadata().await?.len() < entry.length {
                file.seek(SeekFrom::Start(entry.length - 1)).await?;
                file.write_all(&[0]).await?;
            }

            slots.push(FileSlot {
                entry: entry.clone(),
                file: Some(file),
                remaining: entry.length,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            slots,
            piece_length: info.piece_length,
            piece_count: info.piece_count(),
            total_length: info.total_length,
        })
    }

    /// The sub-file slices covering a piece's byte range.
    fn spans(&self, index: usize, piece_len: usize) -> Vec<Span> {
        let start = index as u64 * self.piece_length as u64;
        let end = start + piece_len as u64;

        let mut spans = Vec::new();
        for (slot, file) in self.slots.iter().enumerate() {
            let file_start = file.entry.cumulative_start;
            let file_end = file_start + file.entry.length;
            let overlap_start = start.max(file_start);
            let overlap_end = end.min(file_end);
            if overlap_start < overlap_end {
                spans.push(Span {
                    slot,
                    file_offset: overlap_start - file_start,
                    buf_offset: (overlap_start - start) as usize,
                    length: (overlap_end - overlap_start) as usize,
                });
            }
        }
        spans
    }

    fn checked_spans(&self, index: usize, piece_len: usize) -> Result<Vec<Span>, StorageError> {
        if index >= self.piece_count {
            return Err(StorageError::InvalidPiece(index));
        }
        let spans = self.spans(index, piece_len);
        let covered: usize = spans.iter().map(|s| s.length).sum();
        if covered != piece_len {
            return Err(StorageError::SpanMismatch {
                index,
                covered,
                expected: piece_len,
            });
        }
        Ok(spans)
    }

    /// Writes one verified piece at its positions in the output files.
    ///
    /// Files whose remaining-bytes counter reaches zero are flushed and
    /// closed immediately.
    pub async fn write_piece(&mut self, index: usize, data: &[u8]) -> Result<(), StorageError> {
        let spans = self.checked_spans(index, data.len())?;

        for span in spans {
            let root = self.root.clone();
            let slot = &mut self.slots[span.slot];
            let file = ensure_open(&root, slot).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.write_all(&data[span.buf_offset..span.buf_offset + span.length])
                .await?;

            slot.remaining = slot.remaining.saturating_sub(span.length as u64);
            if slot.remaining == 0 {
                close_slot(slot).await;
            }
        }
        Ok(())
    }

    /// Reads a piece back from the output files.
    pub async fn read_piece(
        &mut self,
        index: usize,
        piece_len: usize,
    ) -> Result<Vec<u8>, StorageError> {
        let spans = self.checked_spans(index, piece_len)?;
        let mut buf = vec![0u8; piece_len];

        for span in spans {
            let root = self.root.clone();
            let slot = &mut self.slots[span.slot];
            let file = ensure_open(&root, slot).await?;
            file.seek(SeekFrom::Start(span.file_offset)).await?;
            file.read_exact(&mut buf[span.buf_offset..span.buf_offset + span.length])
                .await?;
        }
        Ok(buf)
    }

    /// Re-verifies every piece the state claims is complete, clearing the
    /// ones that no longer hash correctly. This is the sole correctness
    /// guarantee for resume. Returns how many pieces were invalidated.
    pub async fn revalidate(
        &mut self,
        info: &TorrentInfo,
        state: &DownloadState,
    ) -> Result<usize, StorageError> {
        let claimed = state.completed_pieces();
        if claimed == 0 {
            return Ok(0);
        }
        info!(pieces = claimed, "re-verifying completed pieces");

        let mut invalidated = 0;
        for index in 0..info.piece_count() {
            if !state.is_piece_complete(index) {
                continue;
            }
            let piece_len = info.piece_size(index);
            let data = self.read_piece(index, piece_len).await?;

            let mut hasher = Sha1::new();
            hasher.update(&data);
            let digest: [u8; 20] = hasher.finalize().into();

            if digest == info.pieces[index] {
                // Valid pieces count toward each file's completion so
                // descriptors still close once the rest arrives.
                for span in self.spans(index, piece_len) {
                    let slot = &mut self.slots[span.slot];
                    slot.remaining = slot.remaining.saturating_sub(span.length as u64);
                }
            } else {
                state.clear_piece(index);
                invalidated += 1;
            }
        }

        for slot in &mut self.slots {
            if slot.remaining == 0 {
                close_slot(slot).await;
            }
        }

        if invalidated > 0 {
            info!(invalidated, "cleared corrupted pieces for re-download");
        }
        Ok(invalidated)
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Flushes and closes every descriptor still open.
    pub async fn close(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut file) = slot.file.take() {
                let _ = file.flush().await;
                let _ = file.sync_data().await;
            }
        }
    }
}

async fn ensure_open<'a>(root: &Path, slot: &'a mut FileSlot) -> Result<&'a mut File, StorageError> {
    if slot.file.is_none() {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(root.join(&slot.entry.path))
            .await?;
        slot.file = Some(file);
    }
    match slot.file.as_mut() {
        Some(file) => Ok(file),
        None => Err(StorageError::Io(std::io::Error::other("file slot closed"))),
    }
}

async fn close_slot(slot: &mut FileSlot) {
    if let Some(mut file) = slot.file.take() {
        let _ = file.flush().await;
        let _ = file.sync_data().await;
        debug!(path = %slot.entry.path.display(), "finished writing file");
    }
}
