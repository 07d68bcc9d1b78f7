use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use crate::constants::MAX_FRAME_SIZE;

/// Length-prefixed framing over one TCP stream.
///
/// Deadlines are the caller's concern; the session wraps every read in the
/// timeout appropriate to its state.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
}

impl PeerTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.stream.write_all(&handshake.encode()).await?;
        Ok(())
    }

    pub async fn read_handshake(&mut self) -> Result<Handshake, PeerError> {
        self.fill_to(HANDSHAKE_LEN).await?;
        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.stream.write_all(&message.encode()).await?;
        Ok(())
    }

    /// Reads the next frame, transparently skipping keep-alives.
    pub async fn read_message(&mut self) -> Result<Message, PeerError> {
        loop {
            self.fill_to(4).await?;
            let length = u32::from_be_bytes([
                self.read_buf[0],
                self.read_buf[1],
                self.read_buf[2],
                self.read_buf[3],
            ]) as usize;

            if length == 0 {
                let _ = self.read_buf.split_to(4);
                continue;
            }
            if length > MAX_FRAME_SIZE {
                return Err(PeerError::Protocol(format!("frame of {} bytes", length)));
            }

            self.fill_to(4 + length).await?;
            let frame = self.read_buf.split_to(4 + length);
            return Message::decode(frame.freeze());
        }
    }

    async fn fill_to(&mut self, wanted: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < wanted {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }
}
