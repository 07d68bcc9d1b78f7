use std::path::Path;

use super::error::MetainfoError;
use super::info::TorrentInfo;
use crate::bencode::value_span;

/// A parsed `.torrent` file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub announce: Option<String>,
    pub announce_list: Vec<String>,
    pub info: TorrentInfo,
}

impl Metainfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = crate::bencode::decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| MetainfoError::Invalid("metainfo is not a dictionary".into()))?;

        let announce = dict
            .get(b"announce".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);

        let mut announce_list = Vec::new();
        if let Some(tiers) = dict.get(b"announce-list".as_slice()).and_then(|v| v.as_list()) {
            for tier in tiers {
                if let Some(urls) = tier.as_list() {
                    announce_list.extend(urls.iter().filter_map(|u| u.as_str()).map(String::from));
                }
            }
        }

        let span = info_span(data)?;
        let info = TorrentInfo::from_info_dict(&data[span], None)?;

        Ok(Self {
            announce,
            announce_list,
            info,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetainfoError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// All tracker URLs, announce first, deduplicated.
    pub fn trackers(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(announce) = &self.announce {
            urls.push(announce.clone());
        }
        for url in &self.announce_list {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

/// Locates the raw byte range of the top-level "info" value.
///
/// The hash must cover the bytes as they appear in the source, so the
/// dictionary is walked positionally instead of being re-encoded.
fn info_span(data: &[u8]) -> Result<std::ops::Range<usize>, MetainfoError> {
    if data.first() != Some(&b'd') {
        return Err(MetainfoError::Invalid("metainfo is not a dictionary".into()));
    }

    let mut pos = 1;
    while pos < data.len() && data[pos] != b'e' {
        let key_span = value_span(data, pos)?;
        let key_raw = &data[key_span.clone()];
        let key = key_raw
            .iter()
            .position(|&b| b == b':')
            .map(|colon| &key_raw[colon + 1..])
            .ok_or_else(|| MetainfoError::Invalid("non-string metainfo key".into()))?;

        let val_span = value_span(data, key_span.end)?;
        if key == b"info" {
            return Ok(val_span);
        }
        pos = val_span.end;
    }

    Err(MetainfoError::MissingField("info"))
}
