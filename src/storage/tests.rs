use std::path::PathBuf;

use sha1::{Digest, Sha1};
use tempfile::TempDir;

use super::*;
use crate::metainfo::{InfoHash, SubFile, TorrentInfo};

fn sha1_of(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn test_info(piece_length: usize, files: &[(u64, &str)], content: &[u8]) -> TorrentInfo {
    let mut subfiles = Vec::new();
    let mut cumulative_start = 0u64;
    for &(length, path) in files {
        subfiles.push(SubFile {
            cumulative_start,
            length,
            path: PathBuf::from(path),
        });
        cumulative_start += length;
    }
    assert_eq!(cumulative_start as usize, content.len());

    let pieces = content.chunks(piece_length).map(sha1_of).collect();
    TorrentInfo {
        hash: InfoHash::compute(content),
        name: "test".into(),
        piece_length,
        pieces,
        total_length: cumulative_start,
        files: subfiles,
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn open_preallocates_files() {
    let temp = TempDir::new().unwrap();
    let content = patterned(40);
    let info = test_info(16, &[(40, "data.bin")], &content);

    let _writer = PieceWriter::open(temp.path(), &info).await.unwrap();

    let meta = tokio::fs::metadata(temp.path().join("data.bin")).await.unwrap();
    assert_eq!(meta.len(), 40);
}

#[tokio::test]
async fn write_and_read_piece() {
    let temp = TempDir::new().unwrap();
    let content = patterned(48);
    let info = test_info(16, &[(48, "data.bin")], &content);
    let mut writer = PieceWriter::open(temp.path(), &info).await.unwrap();

    for index in 0..3 {
        writer
            .write_piece(index, &content[index * 16..(index + 1) * 16])
            .await
            .unwrap();
    }
    for index in 0..3 {
        let back = writer.read_piece(index, 16).await.unwrap();
        assert_eq!(back, &content[index * 16..(index + 1) * 16]);
    }
}

#[tokio::test]
async fn piece_spanning_two_files_lands_in_both() {
    let temp = TempDir::new().unwrap();
    let content = patterned(32);
    // Piece 0 covers all of a.bin (10 bytes) plus the first 6 of b.bin.
    let info = test_info(16, &[(10, "a.bin"), (22, "b.bin")], &content);
    let mut writer = PieceWriter::open(temp.path(), &info).await.unwrap();

    writer.write_piece(0, &content[..16]).await.unwrap();
    writer.write_piece(1, &content[16..]).await.unwrap();
    writer.close().await;

    let a = tokio::fs::read(temp.path().join("a.bin")).await.unwrap();
    let b = tokio::fs::read(temp.path().join("b.bin")).await.unwrap();
    assert_eq!(a, &content[..10]);
    assert_eq!(b, &content[10..]);
}

#[tokio::test]
async fn final_short_piece_respects_file_length() {
    let temp = TempDir::new().unwrap();
    let content = patterned(20);
    let info = test_info(16, &[(20, "data.bin")], &content);
    let mut writer = PieceWriter::open(temp.path(), &info).await.unwrap();

    assert_eq!(info.piece_size(1), 4);
    writer.write_piece(0, &content[..16]).await.unwrap();
    writer.write_piece(1, &content[16..]).await.unwrap();
    writer.close().await;

    let data = tokio::fs::read(temp.path().join("data.bin")).await.unwrap();
    assert_eq!(data.len(), 20);
    assert_eq!(data, content);
}

#[tokio::test]
async fn oversized_write_is_rejected() {
    let temp = TempDir::new().unwrap();
    let content = patterned(20);
    let info = test_info(16, &[(20, "data.bin")], &content);
    let mut writer = PieceWriter::open(temp.path(), &info).await.unwrap();

    // The final piece is 4 bytes; 16 would run past the content.
    assert!(matches!(
        writer.write_piece(1, &[0u8; 16]).await,
        Err(StorageError::SpanMismatch { .. })
    ));
    assert!(matches!(
        writer.write_piece(9, &[0u8; 16]).await,
        Err(StorageError::InvalidPiece(9))
    ));
}

#[tokio::test]
async fn revalidate_clears_corrupted_pieces() {
    let temp = TempDir::new().unwrap();
    let content = patterned(32);
    let info = test_info(16, &[(32, "data.bin")], &content);
    let mut writer = PieceWriter::open(temp.path(), &info).await.unwrap();

    writer.write_piece(0, &content[..16]).await.unwrap();
    writer.write_piece(1, &[0xEE; 16]).await.unwrap();

    let state = DownloadState::new(info.hash, &info.name, temp.path(), 2, 16, 32);
    state.mark_piece_complete(0);
    state.mark_piece_complete(1);

    let invalidated = writer.revalidate(&info, &state).await.unwrap();
    assert_eq!(invalidated, 1);
    assert!(state.is_piece_complete(0));
    assert!(!state.is_piece_complete(1));
}

#[test]
fn state_tracks_piece_completion() {
    let hash = InfoHash([7u8; 20]);
    let state = DownloadState::new(hash, "t", std::path::Path::new("/tmp/out"), 20, 16384, 0);

    assert_eq!(state.completed_pieces(), 0);
    state.mark_piece_complete(0);
    state.mark_piece_complete(13);
    state.mark_piece_complete(99); // out of range, ignored
    assert_eq!(state.completed_pieces(), 2);
    assert!(state.is_piece_complete(13));
    assert!(!state.is_piece_complete(12));

    state.clear_piece(13);
    assert!(!state.is_piece_complete(13));

    let bf = state.downloaded();
    assert!(bf.get(0));
    assert_eq!(bf.count_ones(), 1);
}

#[test]
fn state_deduplicates_peers() {
    let state = DownloadState::new(
        InfoHash([1u8; 20]),
        "t",
        std::path::Path::new("/tmp/out"),
        4,
        16384,
        0,
    );
    state.add_peers(&["10.0.0.1:6881".into(), "10.0.0.2:6881".into()]);
    state.add_peers(&["10.0.0.1:6881".into(), "10.0.0.3:6881".into()]);
    assert_eq!(state.peers().len(), 3);
}

#[test]
fn state_save_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    std::env::set_var("XDG_CACHE_HOME", temp.path());

    let hash = InfoHash([0xAB; 20]);
    let state = DownloadState::new(hash, "resume-me", std::path::Path::new("/tmp/out"), 8, 16384, 131072);
    state.mark_piece_complete(3);
    state.add_peers(&["10.0.0.1:6881".into()]);
    state.set_magnet_link("magnet:?xt=urn:btih:abcdef");
    state.save().unwrap();

    let loaded = DownloadState::load(&hash).unwrap();
    assert_eq!(loaded.name(), "resume-me");
    assert_eq!(loaded.total_pieces(), 8);
    assert!(loaded.is_piece_complete(3));
    assert_eq!(loaded.peers(), vec!["10.0.0.1:6881".to_string()]);

    state.delete().unwrap();
    assert!(DownloadState::load(&hash).is_err());
    // Deleting again is not an error.
    state.delete().unwrap();
}
