use std::path::PathBuf;

use super::error::MetainfoError;
use super::info_hash::InfoHash;
use crate::bencode::{decode, Value};

/// One output file inside the content.
///
/// The content is the concatenation of sub-files in declaration order;
/// `cumulative_start` is the sum of all prior lengths.
#[derive(Debug, Clone)]
pub struct SubFile {
    pub cumulative_start: u64,
    pub length: u64,
    pub path: PathBuf,
}

impl SubFile {
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        self.cumulative_start..self.cumulative_start + self.length
    }
}

/// The parsed info dictionary: everything needed to download and verify.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    pub hash: InfoHash,
    pub name: String,
    pub piece_length: usize,
    pub pieces: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<SubFile>,
}

impl TorrentInfo {
    /// Parses a raw info dictionary.
    ///
    /// `data` must be the info value's bytes exactly as they appeared in
    /// the `.torrent` file or arrived over ut_metadata; the hash is taken
    /// over those bytes. When `expected` is given (the magnet case) a
    /// mismatch is an integrity failure and the data is discarded.
    pub fn from_info_dict(
        data: &[u8],
        expected: Option<&InfoHash>,
    ) -> Result<Self, MetainfoError> {
        let hash = InfoHash::compute(data);
        if let Some(expected) = expected {
            if *expected != hash {
                return Err(MetainfoError::InfoHashMismatch);
            }
        }

        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| MetainfoError::Invalid("info is not a dictionary".into()))?;

        let name = dict
            .get(b"name".as_slice())
            .and_then(|v| v.as_str())
            .ok_or(MetainfoError::MissingField("name"))?
            .to_string();

        let piece_length = dict
            .get(b"piece length".as_slice())
            .and_then(|v| v.as_int())
            .filter(|&n| n > 0)
            .ok_or(MetainfoError::MissingField("piece length"))?
            as usize;

        let pieces_raw = dict
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or(MetainfoError::MissingField("pieces"))?;
        if pieces_raw.len() % 20 != 0 {
            return Err(MetainfoError::Invalid("pieces length not a multiple of 20".into()));
        }
        let pieces: Vec<[u8; 20]> = pieces_raw
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let files = match dict.get(b"files".as_slice()) {
            Some(entries) => parse_file_list(entries)?,
            None => {
                let length = dict
                    .get(b"length".as_slice())
                    .and_then(|v| v.as_int())
                    .filter(|&n| n >= 0)
                    .ok_or(MetainfoError::MissingField("length"))?
                    as u64;
                vec![SubFile {
                    cumulative_start: 0,
                    length,
                    path: PathBuf::from(&name),
                }]
            }
        };

        let total_length: u64 = files.iter().map(|f| f.length).sum();

        let expected_pieces = total_length.div_ceil(piece_length as u64) as usize;
        if pieces.len() != expected_pieces {
            return Err(MetainfoError::Invalid(format!(
                "{} piece hashes for {} bytes of content",
                pieces.len(),
                total_length
            )));
        }

        Ok(Self {
            hash,
            name,
            piece_length,
            pieces,
            total_length,
            files,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Actual length of a piece; the final piece may be shorter.
    pub fn piece_size(&self, index: usize) -> usize {
        let remainder = (self.total_length % self.piece_length as u64) as usize;
        if index + 1 == self.pieces.len() && remainder != 0 {
            remainder
        } else {
            self.piece_length
        }
    }

    /// Multi-file torrents download into a directory named after the torrent.
    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }
}

fn parse_file_list(entries: &Value) -> Result<Vec<SubFile>, MetainfoError> {
    let list = entries
        .as_list()
        .ok_or_else(|| MetainfoError::Invalid("files is not a list".into()))?;

    let mut files = Vec::with_capacity(list.len());
    let mut cumulative_start = 0u64;

    for entry in list {
        let length = entry
            .get(b"length")
            .and_then(|v| v.as_int())
            .filter(|&n| n >= 0)
            .ok_or(MetainfoError::MissingField("length"))? as u64;

        let components = entry
            .get(b"path")
            .and_then(|v| v.as_list())
            .ok_or(MetainfoError::MissingField("path"))?;

        let mut path = PathBuf::new();
        for component in components {
            let part = component
                .as_str()
                .ok_or_else(|| MetainfoError::Invalid("non-string path component".into()))?;
            if part.is_empty() || part == "." || part == ".." {
                return Err(MetainfoError::Invalid(format!(
                    "unsafe path component {:?}",
                    part
                )));
            }
            path.push(part);
        }
        if path.as_os_str().is_empty() {
            return Err(MetainfoError::Invalid("empty file path".into()));
        }

        files.push(SubFile {
            cumulative_start,
            length,
            path,
        });
        cumulative_start += length;
    }

    if files.is_empty() {
        return Err(MetainfoError::Invalid("empty files list".into()));
    }
    Ok(files)
}
