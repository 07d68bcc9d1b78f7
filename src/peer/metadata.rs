//! Metadata exchange messages (ut_metadata, BEP-9).
//!
//! The info dictionary is transferred in 16 KiB pieces inside extended
//! messages. Each message is a small bencoded dict; data messages append
//! the raw piece bytes after the dict.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode, encode, value_span, Value};
use crate::constants::METADATA_PIECE_SIZE;

/// One ut_metadata message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    /// `msg_type=0`: ask for metadata piece `piece`.
    Request { piece: u32 },
    /// `msg_type=1`: piece data, with the total metadata size.
    Data {
        piece: u32,
        total_size: u32,
        payload: Bytes,
    },
    /// `msg_type=2`: the peer declines to serve the piece.
    Reject { piece: u32 },
}

impl MetadataMessage {
    pub fn encode(&self) -> Bytes {
        let mut dict = BTreeMap::new();
        let (msg_type, piece) = match self {
            MetadataMessage::Request { piece } => (0, *piece),
            MetadataMessage::Data { piece, .. } => (1, *piece),
            MetadataMessage::Reject { piece } => (2, *piece),
        };
        dict.insert(Bytes::from_static(b"msg_type"), Value::Integer(msg_type));
        dict.insert(Bytes::from_static(b"piece"), Value::Integer(piece as i64));
        if let Some(total) = self.total_size() {
            dict.insert(
                Bytes::from_static(b"total_size"),
                Value::Integer(total as i64),
            );
        }

        let mut out = encode(&Value::Dict(dict));
        if let MetadataMessage::Data { payload, .. } = self {
            out.extend_from_slice(payload);
        }
        Bytes::from(out)
    }

    /// Decodes a message; for data messages the piece bytes follow the dict.
    pub fn decode(payload: &[u8]) -> Result<Self, PeerError> {
        let span = value_span(payload, 0)
            .map_err(|_| PeerError::Extension("truncated metadata dict".into()))?;
        let dict_end = span.end;
        let value = decode(&payload[..dict_end])?;
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("metadata message is not a dict".into()))?;

        let msg_type = dict
            .get(b"msg_type".as_slice())
            .and_then(|v| v.as_int())
            .ok_or_else(|| PeerError::Extension("missing msg_type".into()))?;
        let piece = dict
            .get(b"piece".as_slice())
            .and_then(|v| v.as_int())
            .ok_or_else(|| PeerError::Extension("missing piece".into()))? as u32;

        match msg_type {
            0 => Ok(MetadataMessage::Request { piece }),
            1 => {
                let total_size = dict
                    .get(b"total_size".as_slice())
                    .and_then(|v| v.as_int())
                    .ok_or_else(|| PeerError::Extension("missing total_size".into()))?
                    as u32;
                Ok(MetadataMessage::Data {
                    piece,
                    total_size,
                    payload: Bytes::copy_from_slice(&payload[dict_end..]),
                })
            }
            2 => Ok(MetadataMessage::Reject { piece }),
            other => Err(PeerError::Extension(format!("unknown msg_type {}", other))),
        }
    }

    fn total_size(&self) -> Option<u32> {
        match self {
            MetadataMessage::Data { total_size, .. } => Some(*total_size),
            _ => None,
        }
    }
}

/// Number of 16 KiB pieces a metadata blob of `total_size` bytes spans.
pub fn metadata_piece_count(total_size: usize) -> usize {
    total_size.div_ceil(METADATA_PIECE_SIZE)
}
