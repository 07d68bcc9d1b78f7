use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;
use crate::constants::{DHT_BIT, EXTENSION_BIT, PROTOCOL_STRING};

/// Length of the fixed-size handshake.
pub const HANDSHAKE_LEN: usize = 68;

/// Message type bytes of the peer wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    /// DHT port announcement.
    Port = 9,
    /// Extension protocol message (BEP-10).
    Extended = 20,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            9 => Port,
            20 => Extended,
            other => return Err(PeerError::UnknownMessageId(other)),
        })
    }
}

/// The 68-byte handshake opening every connection.
///
/// `pstrlen | "BitTorrent protocol" | reserved[8] | info_hash[20] | peer_id[20]`.
/// Reserved byte 5 bit 0x10 advertises the extension protocol, reserved
/// byte 7 bit 0x01 advertises DHT support.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    /// A handshake advertising extension-protocol and DHT support.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= EXTENSION_BIT;
        reserved[7] |= DHT_BIT;
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    pub fn supports_extension_protocol(&self) -> bool {
        self.reserved[5] & EXTENSION_BIT != 0
    }

    pub fn supports_dht(&self) -> bool {
        self.reserved[7] & DHT_BIT != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_STRING.len() as u8);
        buf.put_slice(PROTOCOL_STRING);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let ok = data.len() >= HANDSHAKE_LEN
            && data[0] as usize == PROTOCOL_STRING.len()
            && &data[1..20] == PROTOCOL_STRING;
        if !ok {
            return Err(PeerError::InvalidHandshake);
        }

        let field = |range: std::ops::Range<usize>| data[range].to_vec();
        Ok(Self {
            reserved: field(20..28).try_into().unwrap_or([0; 8]),
            info_hash: field(28..48).try_into().unwrap_or([0; 20]),
            peer_id: field(48..68).try_into().unwrap_or([0; 20]),
        })
    }
}

/// A framed peer wire message: `length:u32 | type:u8 | payload`.
///
/// A zero length frame is a keep-alive and carries no type byte.
#[derive(Debug, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
    Extended { id: u8, payload: Bytes },
}

impl Message {
    fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield(_) => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::Port(_) => Some(MessageId::Port),
            Message::Extended { .. } => Some(MessageId::Extended),
        }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece } => buf.put_u32(*piece),
            Message::Bitfield(bits) => buf.put_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, data } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(data);
            }
            Message::Port(port) => buf.put_u16(*port),
            Message::Extended { id, payload } => {
                buf.put_u8(*id);
                buf.put_slice(payload);
            }
        }
    }

    /// Encodes the message including its length prefix.
    pub fn encode(&self) -> Bytes {
        let Some(id) = self.id() else {
            let mut frame = BytesMut::with_capacity(4);
            frame.put_u32(0);
            return frame.freeze();
        };

        let mut payload = BytesMut::new();
        self.write_payload(&mut payload);

        let mut frame = BytesMut::with_capacity(5 + payload.len());
        frame.put_u32(1 + payload.len() as u32);
        frame.put_u8(id as u8);
        frame.put_slice(&payload);
        frame.freeze()
    }

    /// Decodes one complete frame, length prefix included.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("frame too short".into()));
        }
        let declared = data.get_u32() as usize;
        if declared == 0 {
            return Ok(Message::KeepAlive);
        }
        if data.remaining() < declared {
            return Err(PeerError::InvalidMessage("incomplete frame".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;
        let mut payload = data.split_to(declared - 1);

        let message = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                ensure(&payload, 4)?;
                Message::Have {
                    piece: payload.get_u32(),
                }
            }
            MessageId::Bitfield => Message::Bitfield(payload),
            MessageId::Request => {
                ensure(&payload, 12)?;
                Message::Request {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                }
            }
            MessageId::Piece => {
                ensure(&payload, 8)?;
                Message::Piece {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    data: payload,
                }
            }
            MessageId::Cancel => {
                ensure(&payload, 12)?;
                Message::Cancel {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    length: payload.get_u32(),
                }
            }
            MessageId::Port => {
                ensure(&payload, 2)?;
                Message::Port(payload.get_u16())
            }
            MessageId::Extended => {
                ensure(&payload, 1)?;
                Message::Extended {
                    id: payload.get_u8(),
                    payload,
                }
            }
        };
        Ok(message)
    }
}

fn ensure(payload: &Bytes, wanted: usize) -> Result<(), PeerError> {
    if payload.remaining() < wanted {
        return Err(PeerError::InvalidMessage("payload too short".into()));
    }
    Ok(())
}
