use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA, UT_METADATA_LOCAL_ID};
use super::message::{Handshake, Message};
use super::metadata::{metadata_piece_count, MetadataMessage};
use super::peer_id::PeerId;
use super::queue::{Piece, PieceQueue};
use super::transport::PeerTransport;
use crate::constants::{
    BLOCK_SIZE, HANDSHAKE_TIMEOUT, MAX_METADATA_SIZE, METADATA_PIECE_SIZE, PIECE_READ_TIMEOUT,
    PIPELINE_REQUESTS,
};
use crate::metainfo::InfoHash;

/// One connection to one remote peer.
///
/// The session owns its transport and its in-flight request window. It
/// never holds the piece queue's lock across I/O; the queue is only poked
/// on `have` messages.
pub struct PeerSession {
    addr: String,
    transport: PeerTransport,
    info_hash: InfoHash,
    remote_peer_id: [u8; 20],
    bitfield: Bitfield,
    choked: bool,
    extensions: Option<ExtensionHandshake>,
    dht_port: Option<u16>,
    queue: Option<Arc<PieceQueue>>,
}

impl PeerSession {
    /// Connects, handshakes, and completes the intro phase.
    ///
    /// The whole of connect + handshake runs under a 5 second budget. The
    /// intro then reads until the remote's bitfield arrives, capturing the
    /// extension handshake on the way when the peer advertised BEP-10.
    /// `piece_count` of zero (magnet start, layout unknown) sizes the
    /// bitfield from the wire payload.
    pub async fn connect(
        addr: &str,
        info_hash: InfoHash,
        client_id: PeerId,
        piece_count: usize,
    ) -> Result<Self, PeerError> {
        let ours = Handshake::new(*info_hash.as_bytes(), *client_id.as_bytes());

        let (mut transport, theirs) = timeout(HANDSHAKE_TIMEOUT, async {
            let stream = TcpStream::connect(addr).await?;
            let mut transport = PeerTransport::new(stream);
            transport.send_handshake(&ours).await?;
            let theirs = transport.read_handshake().await?;
            Ok::<_, PeerError>((transport, theirs))
        })
        .await
        .map_err(|_| PeerError::Timeout)??;

        if theirs.info_hash != *info_hash.as_bytes() {
            return Err(PeerError::InfoHashMismatch);
        }

        if theirs.supports_extension_protocol() {
            transport
                .send_message(&Message::Extended {
                    id: EXTENSION_HANDSHAKE_ID,
                    payload: ExtensionHandshake::ours().encode(),
                })
                .await?;
        }

        let mut extensions = None;
        let bitfield = loop {
            let msg = timeout(HANDSHAKE_TIMEOUT, transport.read_message())
                .await
                .map_err(|_| PeerError::Timeout)??;
            match msg {
                Message::Extended {
                    id: EXTENSION_HANDSHAKE_ID,
                    payload,
                } if theirs.supports_extension_protocol() => {
                    extensions = Some(ExtensionHandshake::decode(&payload)?);
                }
                Message::Bitfield(bytes) => {
                    let count = if piece_count == 0 {
                        bytes.len() * 8
                    } else {
                        piece_count
                    };
                    break Bitfield::from_bytes(bytes, count);
                }
                other => trace!(peer = addr, "ignoring {:?} before bitfield", other),
            }
        };

        debug!(
            peer = addr,
            pieces = bitfield.count_ones(),
            extensions = extensions.is_some(),
            "peer session established"
        );

        Ok(Self {
            addr: addr.to_string(),
            transport,
            info_hash,
            remote_peer_id: theirs.peer_id,
            bitfield,
            choked: true,
            extensions,
            dht_port: None,
            queue: None,
        })
    }

    /// Sends `unchoke` + `interested`, entering the downloading state.
    pub async fn start(&mut self) -> Result<(), PeerError> {
        self.transport.send_message(&Message::Unchoke).await?;
        self.transport.send_message(&Message::Interested).await?;
        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn remote_peer_id(&self) -> &[u8; 20] {
        &self.remote_peer_id
    }

    /// The remote's DHT port, once a `port` message has been seen.
    pub fn dht_port(&self) -> Option<u16> {
        self.dht_port
    }

    /// Hook the shared queue up so `have` messages bump availability.
    pub fn attach_queue(&mut self, queue: Arc<PieceQueue>) {
        self.queue = Some(queue);
    }

    /// Whether the peer offered ut_metadata with a plausible size.
    pub fn supports_metadata(&self) -> bool {
        self.metadata_size().is_some()
            && self
                .extensions
                .as_ref()
                .and_then(|hs| hs.extension_id(UT_METADATA))
                .is_some()
    }

    fn metadata_size(&self) -> Option<usize> {
        self.extensions
            .as_ref()
            .and_then(|hs| hs.metadata_size)
            .filter(|&size| size > 0 && size <= MAX_METADATA_SIZE as i64)
            .map(|size| size as usize)
    }

    /// Downloads one piece with a pipelined request window.
    ///
    /// At most [`PIPELINE_REQUESTS`] chunk requests are outstanding, each
    /// read is bounded by the 20 second deadline, and a block landing
    /// outside the piece terminates the session. Receiving `choke` while
    /// requests are in flight surfaces [`PeerError::Choked`]; the caller
    /// returns the piece to the queue and may keep the session.
    pub async fn download_piece(&mut self, piece: &Piece) -> Result<Vec<u8>, PeerError> {
        let mut buf = vec![0u8; piece.length];
        let mut next_offset = 0usize;
        let mut in_flight = 0usize;
        let mut received = 0usize;

        while received < piece.length {
            if self.choked && in_flight > 0 {
                return Err(PeerError::Choked);
            }

            while !self.choked && in_flight < PIPELINE_REQUESTS && next_offset < piece.length {
                let length = BLOCK_SIZE.min(piece.length - next_offset);
                self.transport
                    .send_message(&Message::Request {
                        index: piece.index as u32,
                        begin: next_offset as u32,
                        length: length as u32,
                    })
                    .await?;
                next_offset += length;
                in_flight += 1;
            }

            let msg = self.read_message().await?;
            self.note(&msg);

            if let Message::Piece { index, begin, data } = msg {
                if index as usize != piece.index {
                    continue;
                }
                let begin = begin as usize;
                let end = begin + data.len();
                if end > piece.length {
                    return Err(PeerError::Protocol(format!(
                        "block bound {} beyond piece of {} bytes",
                        end, piece.length
                    )));
                }
                buf[begin..end].copy_from_slice(&data);
                received += data.len();
                in_flight = in_flight.saturating_sub(1);
            }
        }

        Ok(buf)
    }

    /// Blocks until the peer unchokes us, processing other traffic.
    pub async fn wait_for_unchoke(&mut self) -> Result<(), PeerError> {
        while self.choked {
            let msg = self.read_message().await?;
            self.note(&msg);
        }
        Ok(())
    }

    /// Fetches the whole info dictionary via ut_metadata.
    ///
    /// Pieces are requested with the same pipelined window, assembled in
    /// order, and the result is only returned when its SHA-1 equals the
    /// info hash; anything else is discarded so the caller can try another
    /// peer.
    pub async fn fetch_metadata(&mut self) -> Result<Vec<u8>, PeerError> {
        let remote_id = self
            .extensions
            .as_ref()
            .and_then(|hs| hs.extension_id(UT_METADATA))
            .ok_or(PeerError::NoMetadataSupport)?;
        let total_size = self.metadata_size().ok_or(PeerError::NoMetadataSupport)?;
        let total_pieces = metadata_piece_count(total_size);

        let mut buf = vec![0u8; total_size];
        let mut next_piece = 0usize;
        let mut in_flight = 0usize;
        let mut received = 0usize;

        while received < total_pieces {
            while in_flight < PIPELINE_REQUESTS && next_piece < total_pieces {
                let request = MetadataMessage::Request {
                    piece: next_piece as u32,
                };
                self.transport
                    .send_message(&Message::Extended {
                        id: remote_id,
                        payload: request.encode(),
                    })
                    .await?;
                next_piece += 1;
                in_flight += 1;
            }

            let msg = self.read_message().await?;
            self.note(&msg);

            let Message::Extended { id, payload } = msg else {
                continue;
            };
            if id != UT_METADATA_LOCAL_ID {
                continue;
            }

            match MetadataMessage::decode(&payload)? {
                MetadataMessage::Data { piece, payload, .. } => {
                    let begin = piece as usize * METADATA_PIECE_SIZE;
                    let end = begin + payload.len();
                    if end > total_size {
                        return Err(PeerError::Protocol(format!(
                            "metadata block bound {} beyond {} bytes",
                            end, total_size
                        )));
                    }
                    buf[begin..end].copy_from_slice(&payload);
                    received += 1;
                    in_flight = in_flight.saturating_sub(1);
                }
                MetadataMessage::Reject { piece } => {
                    return Err(PeerError::Extension(format!(
                        "metadata piece {} rejected",
                        piece
                    )));
                }
                MetadataMessage::Request { .. } => {}
            }
        }

        if InfoHash::compute(&buf) != self.info_hash {
            return Err(PeerError::MetadataMismatch);
        }
        Ok(buf)
    }

    async fn read_message(&mut self) -> Result<Message, PeerError> {
        timeout(PIECE_READ_TIMEOUT, self.transport.read_message())
            .await
            .map_err(|_| PeerError::Timeout)?
    }

    /// State updates common to every mode.
    fn note(&mut self, msg: &Message) {
        match msg {
            Message::Choke => self.choked = true,
            Message::Unchoke => self.choked = false,
            Message::Have { piece } => {
                self.bitfield.set(*piece as usize);
                if let Some(queue) = &self.queue {
                    queue.bump(*piece as usize);
                }
            }
            Message::Port(port) => self.dht_port = Some(*port),
            _ => {}
        }
    }
}
