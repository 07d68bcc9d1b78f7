use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode, encode, Value};

/// Extended message id 0 is always the extension handshake.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;

/// The id under which we accept ut_metadata messages.
pub const UT_METADATA_LOCAL_ID: u8 = 1;

/// Extension-message name of the metadata exchange (BEP-9).
pub const UT_METADATA: &str = "ut_metadata";

/// The BEP-10 extension handshake.
///
/// `m` maps extension names to the message ids the sender accepts them
/// under; `metadata_size` advertises the info-dictionary size for
/// ut_metadata.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    pub extensions: BTreeMap<String, u8>,
    pub metadata_size: Option<i64>,
    pub client: Option<String>,
}

impl ExtensionHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handshake we send: ut_metadata accepted under our local id.
    pub fn ours() -> Self {
        let mut hs = Self::new();
        hs.extensions.insert(UT_METADATA.into(), UT_METADATA_LOCAL_ID);
        hs
    }

    pub fn encode(&self) -> Bytes {
        let mut m = BTreeMap::new();
        for (name, id) in &self.extensions {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Integer(*id as i64),
            );
        }

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));
        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Integer(size));
        }
        if let Some(client) = &self.client {
            dict.insert(Bytes::from_static(b"v"), Value::string(client));
        }

        Bytes::from(encode(&Value::Dict(dict)))
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| PeerError::Extension("handshake is not a dict".into()))?;

        let mut extensions = BTreeMap::new();
        if let Some(m) = value.get(b"m").and_then(|v| v.as_dict()) {
            for (key, val) in m {
                let name = std::str::from_utf8(key).ok();
                // Id 0 means the extension is disabled on that side.
                let id = val.as_int().filter(|id| (1..=255).contains(id));
                if let (Some(name), Some(id)) = (name, id) {
                    extensions.insert(name.to_string(), id as u8);
                }
            }
        }

        Ok(Self {
            extensions,
            metadata_size: dict.get(b"metadata_size".as_slice()).and_then(|v| v.as_int()),
            client: dict
                .get(b"v".as_slice())
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }

    /// The id the peer accepts a named extension under.
    pub fn extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }
}
