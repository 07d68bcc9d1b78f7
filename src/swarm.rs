//! Swarm coordinator.
//!
//! Orchestrates one download: collects peer addresses, runs the metadata
//! phase for magnets, spawns a worker task per peer, and is the single
//! consumer of downloaded pieces — verifying, writing, updating state, and
//! emitting progress. Cancellation is a distinguished outcome, not an
//! error.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::constants::{PROGRESS_STEP_PERCENT, STATE_SAVE_INTERVAL_PIECES};
use crate::dht::DhtServer;
use crate::metainfo::{InfoHash, MagnetLink, Metainfo, MetainfoError, TorrentInfo};
use crate::peer::{PeerError, PeerId, PeerSession, Piece, PieceQueue, SelectionStrategy};
use crate::storage::{cache_dir, DownloadState, PieceWriter, StorageError};

#[derive(Debug, Error)]
pub enum SwarmError {
    /// The peer set was empty before the download could start.
    #[error("no peers available")]
    NoPeers,

    /// No peer produced a verifiable info dictionary.
    #[error("metadata could not be fetched from any peer")]
    MetadataUnavailable,

    /// Every session ended while pieces were still missing.
    #[error("all peer sessions ended before the download completed")]
    PeersExhausted,

    /// A write or sync failure; the download is aborted.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a download ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Complete,
    /// The cancel handle fired; state was persisted for resume.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub completed_pieces: usize,
    pub total_pieces: usize,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Clone)]
pub struct DownloadOptions {
    /// Rarest-first piece selection; sequential otherwise.
    pub rarest_first: bool,
    /// Persist a state file for resume and delete it on completion.
    pub persist_state: bool,
    /// Invoked after every verified piece.
    pub on_progress: Option<ProgressCallback>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            rarest_first: true,
            persist_state: true,
            on_progress: None,
        }
    }
}

/// Where the download came from; recorded in the state file so the
/// front-end can resume it later.
#[derive(Debug, Clone)]
enum Source {
    TorrentFile(String),
    Magnet(String),
}

/// Cancels the coordinator it was taken from. Cheap to clone and safe to
/// fire from any task.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

struct PieceResult {
    index: usize,
    data: Vec<u8>,
}

/// One download's orchestrator.
///
/// Workers pull pieces from the shared queue and push results back over a
/// channel; the coordinator alone verifies hashes and touches the writer
/// and state, so piece completion is linearised here.
pub struct SwarmCoordinator {
    info_hash: InfoHash,
    client_id: PeerId,
    output_root: PathBuf,
    peers: Vec<String>,
    options: DownloadOptions,
    source: Option<Source>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl SwarmCoordinator {
    pub fn new(info_hash: InfoHash, output_root: &Path) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            info_hash,
            client_id: PeerId::generate(),
            output_root: output_root.to_path_buf(),
            peers: Vec::new(),
            options: DownloadOptions::default(),
            source: None,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds peer addresses, deduplicating on the textual `host:port` form.
    pub fn add_peers<I: IntoIterator<Item = String>>(&mut self, addrs: I) {
        for addr in addrs {
            if !self.peers.contains(&addr) {
                self.peers.push(addr);
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn client_id(&self) -> &PeerId {
        &self.client_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    fn set_source(&mut self, source: Source) {
        self.source = Some(source);
    }

    /// Downloads with a known piece layout.
    pub async fn run_with_info(&self, info: &TorrentInfo) -> Result<DownloadOutcome, SwarmError> {
        if self.peers.is_empty() {
            return Err(SwarmError::NoPeers);
        }

        // Multi-file content nests under a directory named after the torrent.
        let out_dir = if info.is_multi_file() {
            self.output_root.join(&info.name)
        } else {
            self.output_root.clone()
        };

        let loaded = if self.options.persist_state {
            DownloadState::load(&self.info_hash).ok()
        } else {
            None
        };
        let resuming = loaded.is_some();
        let state = loaded.unwrap_or_else(|| {
            DownloadState::new(
                self.info_hash,
                &info.name,
                &out_dir,
                info.piece_count(),
                info.piece_length,
                info.total_length,
            )
        });
        match &self.source {
            Some(Source::TorrentFile(path)) => state.set_torrent_path(path),
            Some(Source::Magnet(link)) => state.set_magnet_link(link),
            None => {}
        }
        state.add_peers(&self.peers);

        let mut writer = PieceWriter::open(&out_dir, info).await?;
        if resuming {
            writer.revalidate(info, &state).await?;
            info!(
                completed = state.completed_pieces(),
                total = info.piece_count(),
                "resuming download"
            );
        }

        let pieces: Vec<Piece> = (0..info.piece_count())
            .map(|index| Piece {
                index,
                hash: info.pieces[index],
                length: info.piece_size(index),
            })
            .collect();
        let strategy = if self.options.rarest_first {
            SelectionStrategy::RarestFirst
        } else {
            SelectionStrategy::Sequential
        };
        let queue = Arc::new(PieceQueue::new(pieces, &state.downloaded(), strategy));

        let to_download = info.piece_count() - state.completed_pieces();
        if to_download == 0 {
            info!("download already complete");
            writer.close().await;
            if self.options.persist_state {
                state.delete()?;
            }
            return Ok(DownloadOutcome::Complete);
        }
        info!(
            remaining = to_download,
            total = info.piece_count(),
            peers = self.peers.len(),
            "starting piece download"
        );

        let (results_tx, results_rx) = mpsc::channel::<PieceResult>(16);
        for addr in &self.peers {
            tokio::spawn(peer_worker(
                addr.clone(),
                self.info_hash,
                self.client_id,
                queue.clone(),
                results_tx.clone(),
                self.cancel_rx.clone(),
            ));
        }
        drop(results_tx);

        self.collect_results(info, &state, &mut writer, &queue, results_rx, to_download)
            .await
    }

    /// The coordinator's receive loop: verify, write, account, notify.
    async fn collect_results(
        &self,
        info: &TorrentInfo,
        state: &DownloadState,
        writer: &mut PieceWriter,
        queue: &Arc<PieceQueue>,
        mut results_rx: mpsc::Receiver<PieceResult>,
        to_download: usize,
    ) -> Result<DownloadOutcome, SwarmError> {
        let total_pieces = info.piece_count();
        let mut cancel = self.cancel_rx.clone();
        let mut completed_in_session = 0usize;
        let mut next_percent = PROGRESS_STEP_PERCENT;
        let mut outcome = None;
        let mut failure = None;

        while outcome.is_none() && failure.is_none() {
            tokio::select! {
                _ = cancel.changed() => {
                    info!("download cancelled, saving state");
                    outcome = Some(DownloadOutcome::Cancelled);
                }
                received = results_rx.recv() => {
                    let Some(result) = received else {
                        // Workers also exit on cancel; report that as the
                        // cancellation it is, not as peer exhaustion.
                        if *cancel.borrow() {
                            outcome = Some(DownloadOutcome::Cancelled);
                        } else {
                            failure = Some(SwarmError::PeersExhausted);
                        }
                        break;
                    };

                    let mut hasher = Sha1::new();
                    hasher.update(&result.data);
                    let digest: [u8; 20] = hasher.finalize().into();
                    if digest != info.pieces[result.index] {
                        warn!(piece = result.index, "hash mismatch, piece re-queued");
                        queue.put_back(result.index);
                        continue;
                    }

                    if let Err(e) = writer.write_piece(result.index, &result.data).await {
                        failure = Some(e.into());
                        break;
                    }
                    queue.complete(result.index);
                    state.mark_piece_complete(result.index);
                    completed_in_session += 1;

                    let done = state.completed_pieces();
                    if let Some(callback) = &self.options.on_progress {
                        callback(ProgressEvent {
                            completed_pieces: done,
                            total_pieces,
                            downloaded_bytes: (done as u64 * info.piece_length as u64)
                                .min(info.total_length),
                            total_bytes: info.total_length,
                        });
                    }
                    let percent = done as u64 * 100 / total_pieces as u64;
                    while percent >= next_percent {
                        info!("progress {}% ({}/{} pieces)", next_percent, done, total_pieces);
                        next_percent += PROGRESS_STEP_PERCENT;
                    }
                    if self.options.persist_state
                        && completed_in_session % STATE_SAVE_INTERVAL_PIECES == 0
                    {
                        if let Err(e) = state.save() {
                            warn!("failed to save state: {}", e);
                        }
                    }

                    if completed_in_session >= to_download {
                        outcome = Some(DownloadOutcome::Complete);
                    }
                }
            }
        }

        writer.close().await;

        if let Some(failure) = failure {
            if self.options.persist_state {
                let _ = state.save();
            }
            return Err(failure);
        }

        match outcome {
            Some(DownloadOutcome::Complete) => {
                info!(pieces = total_pieces, "download complete");
                if self.options.persist_state {
                    state.delete()?;
                }
                Ok(DownloadOutcome::Complete)
            }
            _ => {
                if self.options.persist_state {
                    if let Err(e) = state.save() {
                        warn!("failed to save state on cancel: {}", e);
                    }
                }
                Ok(DownloadOutcome::Cancelled)
            }
        }
    }

    /// Magnet entry point: fetch the info dictionary from the swarm first.
    pub async fn run_from_magnet(&self) -> Result<DownloadOutcome, SwarmError> {
        match self.fetch_metadata().await? {
            Some(info) => self.run_with_info(&info).await,
            None => Ok(DownloadOutcome::Cancelled),
        }
    }

    /// Runs sessions in metadata-fetch mode; the first verified info
    /// dictionary wins. `None` means the download was cancelled while
    /// waiting.
    async fn fetch_metadata(&self) -> Result<Option<TorrentInfo>, SwarmError> {
        if self.peers.is_empty() {
            return Err(SwarmError::NoPeers);
        }
        info!(peers = self.peers.len(), "fetching metadata from swarm");

        let (info_tx, mut info_rx) = mpsc::channel::<TorrentInfo>(1);
        for addr in &self.peers {
            tokio::spawn(metadata_worker(
                addr.clone(),
                self.info_hash,
                self.client_id,
                info_tx.clone(),
                self.cancel_rx.clone(),
            ));
        }
        drop(info_tx);

        let mut cancel = self.cancel_rx.clone();
        tokio::select! {
            _ = cancel.changed() => Ok(None),
            received = info_rx.recv() => match received {
                Some(info) => {
                    info!(name = %info.name, pieces = info.piece_count(), "metadata verified");
                    Ok(Some(info))
                }
                None => Err(SwarmError::MetadataUnavailable),
            }
        }
    }
}

/// One peer's download loop: connect, register the bitfield, then pull
/// pieces from the queue until cancelled, finished, or disconnected.
async fn peer_worker(
    addr: String,
    info_hash: InfoHash,
    client_id: PeerId,
    queue: Arc<PieceQueue>,
    results: mpsc::Sender<PieceResult>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut session =
        match PeerSession::connect(&addr, info_hash, client_id, queue.piece_count()).await {
            Ok(session) => session,
            Err(e) => {
                debug!(peer = %addr, "could not connect: {}", e);
                return;
            }
        };
    if let Err(e) = session.start().await {
        debug!(peer = %addr, "could not start session: {}", e);
        return;
    }

    queue.register_peer(session.bitfield());
    session.attach_queue(queue.clone());

    loop {
        if *cancel.borrow() || queue.all_complete() {
            break;
        }

        let piece = match queue.get(session.bitfield()) {
            Some(piece) => piece,
            None => {
                // Nothing this peer can serve right now; wait for a have
                // or for in-progress pieces elsewhere to resolve.
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                continue;
            }
        };
        let index = piece.index;

        let result = tokio::select! {
            _ = cancel.changed() => {
                queue.put_back(index);
                break;
            }
            result = session.download_piece(&piece) => result,
        };

        match result {
            Ok(data) => {
                if results.send(PieceResult { index, data }).await.is_err() {
                    // Coordinator is gone; nothing left to do.
                    queue.put_back(index);
                    break;
                }
            }
            Err(PeerError::Choked) => {
                queue.put_back(index);
                if let Err(e) = session.wait_for_unchoke().await {
                    debug!(peer = %addr, "disconnecting while choked: {}", e);
                    break;
                }
            }
            Err(e) => {
                debug!(peer = %addr, piece = index, "disconnecting: {}", e);
                queue.put_back(index);
                break;
            }
        }
    }

    queue.unregister_peer(session.bitfield());
}

/// One peer's metadata fetch; sends the parsed info dict if it verifies.
async fn metadata_worker(
    addr: String,
    info_hash: InfoHash,
    client_id: PeerId,
    results: mpsc::Sender<TorrentInfo>,
    mut cancel: watch::Receiver<bool>,
) {
    let fetch = async {
        let mut session = PeerSession::connect(&addr, info_hash, client_id, 0).await?;
        session.start().await?;
        let raw = session.fetch_metadata().await?;
        TorrentInfo::from_info_dict(&raw, Some(&info_hash))
            .map_err(|_| PeerError::MetadataMismatch)
    };

    tokio::select! {
        _ = cancel.changed() => {}
        result = fetch => match result {
            Ok(info) => {
                let _ = results.send(info).await;
            }
            Err(e) => debug!(peer = %addr, "metadata fetch failed: {}", e),
        }
    }
}

/// Downloads a `.torrent` file. Peer addresses come from the caller (the
/// tracker client is a pure address producer and lives outside the core).
pub async fn download_torrent(
    torrent_path: &Path,
    peers: Vec<String>,
    output_root: &Path,
    options: DownloadOptions,
) -> Result<DownloadOutcome, SwarmError> {
    let metainfo = Metainfo::load(torrent_path)?;
    info!(
        name = %metainfo.info.name,
        info_hash = %metainfo.info.hash,
        "downloading torrent"
    );

    let mut coordinator = SwarmCoordinator::new(metainfo.info.hash, output_root).with_options(options);
    coordinator.set_source(Source::TorrentFile(torrent_path.display().to_string()));
    coordinator.add_peers(peers);
    coordinator.run_with_info(&metainfo.info).await
}

/// Downloads a magnet reference.
///
/// Aggregates peers from the magnet's `x.pe` hints, the DHT, and any
/// caller-supplied addresses (tracker output), deduplicated textually.
/// With no shared DHT an ephemeral node is bootstrapped for this download,
/// seeded from and saved to a best-effort snapshot.
pub async fn download_magnet(
    magnet: &MagnetLink,
    extra_peers: Vec<String>,
    output_root: &Path,
    shared_dht: Option<Arc<DhtServer>>,
    options: DownloadOptions,
) -> Result<DownloadOutcome, SwarmError> {
    info!(
        name = %magnet.display_name(),
        info_hash = %magnet.info_hash,
        "downloading magnet"
    );

    let mut coordinator = SwarmCoordinator::new(magnet.info_hash, output_root).with_options(options);
    coordinator.set_source(Source::Magnet(magnet.to_uri()));
    coordinator.add_peers(magnet.peer_addresses.iter().cloned());
    coordinator.add_peers(extra_peers);

    let snapshot = cache_dir().join("dht_nodes.json");
    let mut ephemeral: Option<(Arc<DhtServer>, tokio::task::JoinHandle<()>)> = None;
    let dht = match shared_dht {
        Some(dht) => Some(dht),
        None => match DhtServer::bind().await {
            Ok(server) => {
                let server = Arc::new(server);
                let runner = {
                    let server = server.clone();
                    tokio::spawn(async move {
                        let _ = server.run().await;
                    })
                };
                if let Ok(loaded) = server.routing_table().load_snapshot(&snapshot) {
                    if loaded > 0 {
                        debug!(loaded, "seeded routing table from snapshot");
                    }
                }
                server.bootstrap().await;
                ephemeral = Some((server.clone(), runner));
                Some(server)
            }
            Err(e) => {
                warn!("DHT unavailable, continuing with other peer sources: {}", e);
                None
            }
        },
    };

    if let Some(dht) = &dht {
        // Magnet peer hints may be DHT nodes too.
        for hint in &magnet.peer_addresses {
            if let Ok(addr) = hint.parse::<SocketAddr>() {
                let dht = dht.clone();
                tokio::spawn(async move {
                    let _ = dht.ping(addr).await;
                });
            }
        }

        match dht.get_peers(*magnet.info_hash.as_bytes()).await {
            Ok(found) => {
                info!(peers = found.len(), "peers from DHT");
                coordinator.add_peers(found.iter().map(|a| a.to_string()));
            }
            Err(e) => debug!("DHT lookup produced no peers: {}", e),
        }
    }

    let result = if coordinator.peer_count() == 0 {
        Err(SwarmError::NoPeers)
    } else {
        info!(peers = coordinator.peer_count(), "peer collection done");
        coordinator.run_from_magnet().await
    };

    if let Some((server, runner)) = ephemeral {
        let _ = server.routing_table().save_snapshot(&snapshot);
        runner.abort();
    }

    result
}

#[cfg(test)]
mod tests;
