use std::collections::HashMap;

use super::error::MetainfoError;
use super::info_hash::InfoHash;

/// A parsed magnet reference.
///
/// Format: `magnet:?xt=urn:btih:<info-hash>&dn=<name>&tr=<tracker>...`.
/// Only v1 (`urn:btih:`) hashes are supported; `urn:btmh:` is rejected as
/// unsupported.
#[derive(Debug, Clone)]
pub struct MagnetLink {
    /// The torrent's info hash (required, from `xt`).
    pub info_hash: InfoHash,
    /// Suggested display name, from `dn`.
    pub display_name: Option<String>,
    /// Tracker URLs, from `tr`.
    pub trackers: Vec<String>,
    /// Web seed URLs, from `ws`. Exposed but unused by the engine.
    pub web_seeds: Vec<String>,
    /// Acceptable source URLs, from `xs`. Exposed but unused by the engine.
    pub acceptable_sources: Vec<String>,
    /// `host:port` peer hints, from `x.pe`.
    pub peer_addresses: Vec<String>,
}

impl MagnetLink {
    /// Parses a magnet URI.
    ///
    /// The `xt` parameter is mandatory and must carry a 40-char hex or
    /// 32-char base32 `urn:btih:` hash.
    pub fn parse(uri: &str) -> Result<Self, MetainfoError> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| MetainfoError::InvalidMagnet("missing magnet:? prefix".into()))?;

        let params = parse_query_string(query);

        let xt = params
            .get("xt")
            .and_then(|v| v.first())
            .ok_or_else(|| MetainfoError::InvalidMagnet("missing xt parameter".into()))?;

        let info_hash = if let Some(hash) = xt.strip_prefix("urn:btih:") {
            match hash.len() {
                40 => InfoHash::from_hex(hash)?,
                32 => {
                    let decoded = base32_decode(hash)
                        .ok_or_else(|| MetainfoError::InvalidMagnet("invalid base32".into()))?;
                    InfoHash::from_bytes(&decoded)?
                }
                _ => {
                    return Err(MetainfoError::InvalidMagnet(
                        "invalid info hash length".into(),
                    ))
                }
            }
        } else if xt.starts_with("urn:btmh:") {
            return Err(MetainfoError::InvalidMagnet(
                "urn:btmh: (v2) is unsupported".into(),
            ));
        } else {
            return Err(MetainfoError::InvalidMagnet("unsupported xt format".into()));
        };

        let one = |key: &str| params.get(key).and_then(|v| v.first()).map(|s| url_decode(s));
        let many = |key: &str| -> Vec<String> {
            params
                .get(key)
                .map(|v| v.iter().map(|s| url_decode(s)).collect())
                .unwrap_or_default()
        };

        Ok(Self {
            info_hash,
            display_name: one("dn"),
            trackers: many("tr"),
            web_seeds: many("ws"),
            acceptable_sources: many("xs"),
            peer_addresses: many("x.pe"),
        })
    }

    /// The display name, falling back to the hex info hash.
    pub fn display_name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.info_hash.to_hex())
    }

    pub fn has_trackers(&self) -> bool {
        !self.trackers.is_empty()
    }

    pub fn has_peer_hints(&self) -> bool {
        !self.peer_addresses.is_empty()
    }

    pub fn to_uri(&self) -> String {
        let mut uri = format!("magnet:?xt=urn:btih:{}", self.info_hash.to_hex());

        if let Some(name) = &self.display_name {
            uri.push_str(&format!("&dn={}", url_encode(name)));
        }
        for tracker in &self.trackers {
            uri.push_str(&format!("&tr={}", url_encode(tracker)));
        }
        for ws in &self.web_seeds {
            uri.push_str(&format!("&ws={}", url_encode(ws)));
        }
        for xs in &self.acceptable_sources {
            uri.push_str(&format!("&xs={}", url_encode(xs)));
        }
        for peer in &self.peer_addresses {
            uri.push_str(&format!("&x.pe={}", url_encode(peer)));
        }

        uri
    }
}

fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for part in query.split('&') {
        if let Some((key, value)) = part.split_once('=') {
            params
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    params
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match escaped {
                    Some(byte) => {
                        out.push(byte as char);
                        i += 3;
                    }
                    None => {
                        out.push('%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(' ');
                i += 1;
            }
            byte => {
                out.push(byte as char);
                i += 1;
            }
        }
    }
    out
}

fn url_encode(s: &str) -> String {
    s.bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            other => format!("%{:02X}", other),
        })
        .collect()
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let normalized = input.to_uppercase();
    let mut out = Vec::with_capacity(normalized.len() * 5 / 8);
    let mut accumulator: u32 = 0;
    let mut pending_bits = 0;

    for c in normalized.trim_end_matches('=').bytes() {
        let digit = ALPHABET.iter().position(|&a| a == c)? as u32;
        accumulator = (accumulator << 5) | digit;
        pending_bits += 5;
        if pending_bits >= 8 {
            pending_bits -= 8;
            out.push((accumulator >> pending_bits) as u8);
            accumulator &= (1 << pending_bits) - 1;
        }
    }

    Some(out)
}
