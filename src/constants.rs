//! Protocol constants and tuning parameters.

use std::time::Duration;

/// Client ID prefix for peer ID generation (Azureus-style).
pub const CLIENT_PREFIX: &[u8; 8] = b"-UW0001-";

/// BitTorrent protocol identifier string.
pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Extension protocol bit, reserved byte 5 (BEP-10).
pub const EXTENSION_BIT: u8 = 0x10;

/// DHT support bit, reserved byte 7 (BEP-5).
pub const DHT_BIT: u8 = 0x01;

/// Request/block size on the wire (16 KiB).
pub const BLOCK_SIZE: usize = 1 << 14;

/// Metadata piece size (BEP-9), same 16 KiB unit.
pub const METADATA_PIECE_SIZE: usize = 1 << 14;

/// Outstanding request window per peer session.
pub const PIPELINE_REQUESTS: usize = 5;

/// Any frame declaring a larger payload is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Upper bound on an advertised info dictionary.
pub const MAX_METADATA_SIZE: usize = 1024 * 1024;

/// TCP connect plus handshake budget.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline relative to the last received byte while downloading a piece.
pub const PIECE_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// KRPC query timeout.
pub const KRPC_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Pending KRPC transactions older than this are expired.
pub const TRANSACTION_EXPIRY: Duration = Duration::from_secs(15);

/// DHT bucket size (k in Kademlia).
pub const DHT_K: usize = 8;

/// Number of routing-table buckets (one per bit of a 160-bit id).
pub const DHT_NUM_BUCKETS: usize = 160;

/// Parallel queries per lookup round.
pub const DHT_ALPHA: usize = 3;

/// Iteration cap for the get_peers lookup.
pub const DHT_MAX_ITERATIONS: usize = 12;

/// Aggregated peer count at which a lookup returns early.
pub const DHT_PEERS_EARLY_RETURN: usize = 50;

/// Wall-clock budget for a single get_peers lookup.
pub const DHT_LOOKUP_BUDGET: Duration = Duration::from_secs(10);

/// Buckets whose freshest entry is older than this get refreshed.
pub const DHT_BUCKET_STALE: Duration = Duration::from_secs(15 * 60);

/// Interval between stale-bucket refresh passes.
pub const DHT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// UDP ports tried when binding the DHT node.
pub const DHT_PORT_RANGE: std::ops::RangeInclusive<u16> = 6881..=6889;

/// Well-known DHT entry points.
pub const DHT_BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "router.utorrent.com:6881",
    "dht.transmissionbt.com:6881",
];

/// Progress is logged whenever it crosses a multiple of this percentage.
pub const PROGRESS_STEP_PERCENT: u64 = 5;

/// The download state is snapshotted every this many completed pieces.
pub const STATE_SAVE_INTERVAL_PIECES: usize = 10;
