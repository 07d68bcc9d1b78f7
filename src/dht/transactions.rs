use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use super::message::{KrpcResponse, TransactionId};
use crate::constants::TRANSACTION_EXPIRY;

/// An outstanding query awaiting its response.
pub struct PendingQuery {
    pub method: &'static str,
    pub target: SocketAddr,
    pub sent_at: Instant,
    delivery: oneshot::Sender<KrpcResponse>,
}

/// Hands out 2-byte transaction ids from a monotonic counter and routes
/// responses back to the query that is waiting on them. Responses bearing
/// an unknown transaction id are dropped by the caller when `complete`
/// returns false.
pub struct TransactionManager {
    pending: DashMap<TransactionId, PendingQuery>,
    counter: AtomicU16,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            counter: AtomicU16::new(0),
        }
    }

    pub fn next_id(&self) -> TransactionId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Bytes::copy_from_slice(&n.to_be_bytes())
    }

    /// Registers a pending query; the receiver resolves when a response
    /// with this transaction id arrives, or errors when the entry expires.
    pub fn register(
        &self,
        transaction_id: TransactionId,
        method: &'static str,
        target: SocketAddr,
    ) -> oneshot::Receiver<KrpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            transaction_id,
            PendingQuery {
                method,
                target,
                sent_at: Instant::now(),
                delivery: tx,
            },
        );
        rx
    }

    /// Delivers a response to its one-shot slot. Returns false for unknown
    /// transaction ids.
    pub fn complete(&self, transaction_id: &TransactionId, response: KrpcResponse) -> bool {
        match self.pending.remove(transaction_id) {
            Some((_, query)) => {
                let _ = query.delivery.send(response);
                true
            }
            None => false,
        }
    }

    /// Drops the entry for a query the caller gave up on.
    pub fn forget(&self, transaction_id: &TransactionId) {
        self.pending.remove(transaction_id);
    }

    /// Expires entries older than the transaction deadline; their receivers
    /// resolve with an error. Returns how many were dropped.
    pub fn expire(&self) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, query| query.sent_at.elapsed() <= TRANSACTION_EXPIRY);
        before.saturating_sub(self.pending.len())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
