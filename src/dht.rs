//! Distributed Hash Table (BEP-5).
//!
//! A read-only Kademlia node used to discover peers for an info-hash
//! without a tracker: 160-bucket routing table, KRPC over UDP, iterative
//! `get_peers` lookup, and server handlers so other nodes get useful
//! answers from us. We answer queries but never announce.
//!
//! Node ids and info-hashes share the same 160-bit space; distance is XOR
//! compared big-endian.

mod error;
mod message;
mod node;
mod persist;
mod routing;
mod server;
mod transactions;

pub use error::DhtError;
pub use message::{KrpcBody, KrpcMessage, KrpcQuery, KrpcResponse, TransactionId};
pub use node::{Node, NodeId};
pub use routing::RoutingTable;
pub use server::DhtServer;
pub use transactions::TransactionManager;

#[cfg(test)]
mod tests;
