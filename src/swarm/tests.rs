use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

use super::*;
use crate::peer::{Bitfield, Handshake, Message, MetadataMessage, PeerTransport};

fn sha1_of(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 239) as u8).collect()
}

/// A bencoded single-file info dictionary for `content`.
fn build_info_dict(name: &str, piece_length: usize, content: &[u8]) -> Vec<u8> {
    let mut pieces = Vec::new();
    for chunk in content.chunks(piece_length) {
        pieces.extend_from_slice(&sha1_of(chunk));
    }

    let mut data = Vec::new();
    data.extend_from_slice(format!("d6:lengthi{}e", content.len()).as_bytes());
    data.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
    data.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    data.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
    data.extend_from_slice(&pieces);
    data.push(b'e');
    data
}

struct Seeder {
    info_bytes: Vec<u8>,
    content: Vec<u8>,
    piece_length: usize,
    piece_count: usize,
    serve_metadata: bool,
}

/// A minimal in-process peer that serves a full copy of the content, and
/// optionally the metadata, to every connection it accepts.
async fn run_seeder(listener: TcpListener, seeder: Arc<Seeder>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let seeder = seeder.clone();
        tokio::spawn(async move {
            let _ = serve_peer(stream, seeder).await;
        });
    }
}

async fn serve_peer(stream: TcpStream, seeder: Arc<Seeder>) -> Result<(), crate::PeerError> {
    let mut transport = PeerTransport::new(stream);
    let theirs = transport.read_handshake().await?;

    let mut seeder_id = [0u8; 20];
    seeder_id[..8].copy_from_slice(b"-TS0001-");
    transport
        .send_handshake(&Handshake::new(theirs.info_hash, seeder_id))
        .await?;

    if seeder.serve_metadata {
        let mut hs = crate::peer::ExtensionHandshake::new();
        hs.extensions.insert("ut_metadata".into(), 2);
        hs.metadata_size = Some(seeder.info_bytes.len() as i64);
        transport
            .send_message(&Message::Extended {
                id: 0,
                payload: hs.encode(),
            })
            .await?;
    }

    let bitfield = Bitfield::full(seeder.piece_count);
    transport
        .send_message(&Message::Bitfield(bitfield.to_bytes()))
        .await?;

    loop {
        let msg = transport.read_message().await?;
        match msg {
            Message::Interested => {
                transport.send_message(&Message::Unchoke).await?;
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                // A keep-alive in the middle of piece traffic must be
                // transparently skipped by the downloader.
                transport.send_message(&Message::KeepAlive).await?;
                let start = index as usize * seeder.piece_length + begin as usize;
                let end = start + length as usize;
                transport
                    .send_message(&Message::Piece {
                        index,
                        begin,
                        data: Bytes::copy_from_slice(&seeder.content[start..end]),
                    })
                    .await?;
            }
            // Metadata requests arrive under the id we advertised (2).
            Message::Extended { id: 2, payload } => {
                if let MetadataMessage::Request { piece } = MetadataMessage::decode(&payload)? {
                    let begin = piece as usize * crate::constants::METADATA_PIECE_SIZE;
                    let end = (begin + crate::constants::METADATA_PIECE_SIZE)
                        .min(seeder.info_bytes.len());
                    let reply = MetadataMessage::Data {
                        piece,
                        total_size: seeder.info_bytes.len() as u32,
                        payload: Bytes::copy_from_slice(&seeder.info_bytes[begin..end]),
                    };
                    transport
                        .send_message(&Message::Extended {
                            id: 1,
                            payload: reply.encode(),
                        })
                        .await?;
                }
            }
            _ => {}
        }
    }
}

async fn start_seeder(info_bytes: Vec<u8>, content: Vec<u8>, piece_length: usize, serve_metadata: bool) -> String {
    let piece_count = content.len().div_ceil(piece_length);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let seeder = Arc::new(Seeder {
        info_bytes,
        content,
        piece_length,
        piece_count,
        serve_metadata,
    });
    tokio::spawn(run_seeder(listener, seeder));
    addr
}

fn no_persist() -> DownloadOptions {
    DownloadOptions {
        persist_state: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn downloads_from_loopback_seeder() {
    let temp = TempDir::new().unwrap();
    let piece_length = 32;
    let content = patterned(80); // two full pieces plus a short final one
    let info_bytes = build_info_dict("loop.bin", piece_length, &content);
    let info = TorrentInfo::from_info_dict(&info_bytes, None).unwrap();

    let addr = start_seeder(info_bytes, content.clone(), piece_length, false).await;

    let progress_calls = Arc::new(AtomicUsize::new(0));
    let counter = progress_calls.clone();
    let mut options = no_persist();
    options.on_progress = Some(Arc::new(move |event: ProgressEvent| {
        assert!(event.completed_pieces <= event.total_pieces);
        counter.fetch_add(1, Ordering::Relaxed);
    }));

    let mut coordinator = SwarmCoordinator::new(info.hash, temp.path()).with_options(options);
    coordinator.add_peers([addr]);

    let outcome = coordinator.run_with_info(&info).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::Complete);
    assert_eq!(progress_calls.load(Ordering::Relaxed), 3);

    let written = tokio::fs::read(temp.path().join("loop.bin")).await.unwrap();
    assert_eq!(written, content);
}

#[tokio::test]
async fn magnet_start_fetches_metadata_then_downloads() {
    let temp = TempDir::new().unwrap();
    let piece_length = 32;
    let content = patterned(64);
    let info_bytes = build_info_dict("magnet.bin", piece_length, &content);
    let info_hash = InfoHash::compute(&info_bytes);

    let addr = start_seeder(info_bytes, content.clone(), piece_length, true).await;

    let mut coordinator = SwarmCoordinator::new(info_hash, temp.path()).with_options(no_persist());
    coordinator.add_peers([addr]);

    let outcome = coordinator.run_from_magnet().await.unwrap();
    assert_eq!(outcome, DownloadOutcome::Complete);

    let written = tokio::fs::read(temp.path().join("magnet.bin")).await.unwrap();
    assert_eq!(written, content);
}

#[tokio::test]
async fn cancel_yields_cancelled_outcome() {
    let temp = TempDir::new().unwrap();
    let piece_length = 32;
    let content = patterned(64);
    let info_bytes = build_info_dict("stall.bin", piece_length, &content);
    let info = TorrentInfo::from_info_dict(&info_bytes, None).unwrap();

    // A listener that accepts and handshakes but never unchokes, so the
    // download stalls until cancelled.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let stall_count = info.piece_count();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut transport = PeerTransport::new(stream);
                let Ok(theirs) = transport.read_handshake().await else {
                    return;
                };
                let mut id = [0u8; 20];
                id[..8].copy_from_slice(b"-TS0001-");
                let _ = transport.send_handshake(&Handshake::new(theirs.info_hash, id)).await;
                let bitfield = Bitfield::full(stall_count);
                let _ = transport
                    .send_message(&Message::Bitfield(bitfield.to_bytes()))
                    .await;
                // Swallow traffic without ever unchoking.
                while transport.read_message().await.is_ok() {}
            });
        }
    });

    let mut coordinator = SwarmCoordinator::new(info.hash, temp.path()).with_options(no_persist());
    coordinator.add_peers([addr]);
    let cancel = coordinator.cancel_handle();

    let coordinator = Arc::new(coordinator);
    let runner = {
        let coordinator = coordinator.clone();
        let info = info.clone();
        tokio::spawn(async move { coordinator.run_with_info(&info).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome, DownloadOutcome::Cancelled);
}

#[tokio::test]
async fn empty_peer_set_fails() {
    let temp = TempDir::new().unwrap();
    let content = patterned(32);
    let info_bytes = build_info_dict("none.bin", 32, &content);
    let info = TorrentInfo::from_info_dict(&info_bytes, None).unwrap();

    let coordinator = SwarmCoordinator::new(info.hash, temp.path()).with_options(no_persist());
    assert!(matches!(
        coordinator.run_with_info(&info).await,
        Err(SwarmError::NoPeers)
    ));
    assert!(matches!(
        coordinator.run_from_magnet().await,
        Err(SwarmError::NoPeers)
    ));
}
