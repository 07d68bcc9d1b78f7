//! Bencode encoding and decoding (BEP-3).
//!
//! Bencode is the serialisation used by torrent metainfo and by KRPC.
//! Four kinds exist: byte strings (`<len>:<bytes>`), integers
//! (`i<decimal>e`), lists (`l...e`) and dictionaries (`d...e`). Dictionary
//! keys are byte strings, sorted bytewise ascending on encode; the decoder
//! accepts any key order but rejects non-string keys.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, value_span};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
