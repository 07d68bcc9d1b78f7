use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use rand::Rng as _;

use super::error::DhtError;
use crate::constants::DHT_NUM_BUCKETS;

/// Compact node info sizes: 20-byte id plus address.
const COMPACT_V4_LEN: usize = 26;
const COMPACT_V6_LEN: usize = 38;

/// A 160-bit DHT node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| DhtError::InvalidNodeId)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance, compared big-endian.
    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut dist = [0u8; 20];
        for (out, (a, b)) in dist.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *out = a ^ b;
        }
        dist
    }

    /// Bucket index relative to `self`: the count of leading zero bits of
    /// the distance. An identical id maps to the highest bucket.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let dist = self.distance(other);
        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        DHT_NUM_BUCKETS - 1
    }

    /// An id guaranteed to land in the given bucket of `self`'s table,
    /// made by flipping the bit at that position.
    pub fn random_id_in_bucket(&self, bucket: usize) -> NodeId {
        if bucket >= DHT_NUM_BUCKETS {
            return NodeId::generate();
        }
        let mut id = self.0;
        id[bucket / 8] ^= 1 << (7 - bucket % 8);
        NodeId(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// A known DHT node: id, UDP address, and when we last heard from it.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Parses compact node info: 26 bytes for IPv4, 38 for IPv6.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        let id = NodeId::from_bytes(data.get(..20)?).ok()?;
        let addr = match data.len() {
            COMPACT_V4_LEN => {
                let ip = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
                let port = u16::from_be_bytes([data[24], data[25]]);
                SocketAddr::new(IpAddr::V4(ip), port)
            }
            COMPACT_V6_LEN => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[20..36]);
                let port = u16::from_be_bytes([data[36], data[37]]);
                SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)
            }
            _ => return None,
        };
        Some(Self::new(id, addr))
    }

    /// Encodes to compact node info; length depends on the address family.
    pub fn to_compact(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMPACT_V6_LEN);
        out.extend_from_slice(&self.id.0);
        match self.addr {
            SocketAddr::V4(v4) => {
                out.extend_from_slice(&v4.ip().octets());
                out.extend_from_slice(&v4.port().to_be_bytes());
            }
            SocketAddr::V6(v6) => {
                out.extend_from_slice(&v6.ip().octets());
                out.extend_from_slice(&v6.port().to_be_bytes());
            }
        }
        out
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}
