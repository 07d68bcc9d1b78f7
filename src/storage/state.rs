use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::metainfo::InfoHash;
use crate::peer::Bitfield;

/// Our directory under the OS cache root (`$XDG_CACHE_HOME`, else
/// `~/.cache`, falling back to the temp dir).
pub fn cache_dir() -> PathBuf {
    let cache_root = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    cache_root.join("undertow")
}

/// The directory download states are stored in.
pub fn state_dir() -> PathBuf {
    cache_dir().join("state")
}

/// The state-file path for one info-hash.
pub fn state_file(info_hash: &InfoHash) -> PathBuf {
    state_dir().join(format!("{}.json", info_hash.to_hex()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateData {
    info_hash: String,
    name: String,
    output_dir: PathBuf,
    total_pieces: usize,
    piece_length: usize,
    total_length: u64,
    /// Packed completed-bitfield, MSB-first like the wire form.
    downloaded: Vec<u8>,
    peers: Vec<String>,
    #[serde(default)]
    torrent_path: String,
    #[serde(default)]
    magnet_link: String,
}

/// Persistent per-download progress.
///
/// One writer mutates it (the coordinator); reads may happen concurrently.
/// The completed-bitfield here decides which pieces are re-verified and
/// skipped on resume.
pub struct DownloadState {
    info_hash: InfoHash,
    data: RwLock<StateData>,
}

impl DownloadState {
    pub fn new(
        info_hash: InfoHash,
        name: &str,
        output_dir: &Path,
        total_pieces: usize,
        piece_length: usize,
        total_length: u64,
    ) -> Self {
        Self {
            info_hash,
            data: RwLock::new(StateData {
                info_hash: info_hash.to_hex(),
                name: name.to_string(),
                output_dir: output_dir.to_path_buf(),
                total_pieces,
                piece_length,
                total_length,
                downloaded: vec![0; total_pieces.div_ceil(8)],
                peers: Vec::new(),
                torrent_path: String::new(),
                magnet_link: String::new(),
            }),
        }
    }

    /// Loads the state file for an info-hash, if one exists.
    pub fn load(info_hash: &InfoHash) -> std::io::Result<Self> {
        let raw = std::fs::read(state_file(info_hash))?;
        let data: StateData = serde_json::from_slice(&raw)?;
        Ok(Self {
            info_hash: *info_hash,
            data: RwLock::new(data),
        })
    }

    /// Snapshots to disk. Serialised under the write lock so concurrent
    /// saves cannot interleave.
    pub fn save(&self) -> std::io::Result<()> {
        let data = self.data.write();
        let path = state_file(&self.info_hash);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&*data)?;
        std::fs::write(path, json)
    }

    /// Removes the state file; missing is fine.
    pub fn delete(&self) -> std::io::Result<()> {
        match std::fs::remove_file(state_file(&self.info_hash)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data.read().output_dir.clone()
    }

    pub fn total_pieces(&self) -> usize {
        self.data.read().total_pieces
    }

    pub fn mark_piece_complete(&self, index: usize) {
        let mut data = self.data.write();
        if index < data.total_pieces {
            data.downloaded[index / 8] |= 1 << (7 - index % 8);
        }
    }

    /// Clears a piece that failed re-verification.
    pub fn clear_piece(&self, index: usize) {
        let mut data = self.data.write();
        if index < data.total_pieces {
            data.downloaded[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    pub fn is_piece_complete(&self, index: usize) -> bool {
        let data = self.data.read();
        index < data.total_pieces && (data.downloaded[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn completed_pieces(&self) -> usize {
        self.data
            .read()
            .downloaded
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        let data = self.data.read();
        let done: usize = data.downloaded.iter().map(|b| b.count_ones() as usize).sum();
        done == data.total_pieces
    }

    /// The completed-bitfield used to seed the piece queue.
    pub fn downloaded(&self) -> Bitfield {
        let data = self.data.read();
        Bitfield::from_bytes(
            bytes::Bytes::copy_from_slice(&data.downloaded),
            data.total_pieces,
        )
    }

    /// Adds peers, deduplicating on the textual `ip:port` form.
    pub fn add_peers(&self, peers: &[String]) {
        let mut data = self.data.write();
        for peer in peers {
            if !data.peers.contains(peer) {
                data.peers.push(peer.clone());
            }
        }
    }

    pub fn peers(&self) -> Vec<String> {
        self.data.read().peers.clone()
    }

    pub fn set_torrent_path(&self, path: &str) {
        self.data.write().torrent_path = path.to_string();
    }

    pub fn set_magnet_link(&self, link: &str) {
        self.data.write().magnet_link = link.to_string();
    }
}
