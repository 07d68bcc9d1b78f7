//! Shared piece selection.
//!
//! The queue tracks every piece's membership (pending, in progress,
//! completed) and its availability across the swarm. Pending pieces live in
//! buckets keyed by availability, so rarest-first selection scans at most
//! one bucket per distinct availability value instead of every piece.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::bitfield::Bitfield;

/// One piece to be downloaded and verified.
#[derive(Debug, Clone)]
pub struct Piece {
    pub index: usize,
    pub hash: [u8; 20],
    pub length: usize,
}

/// How `get` picks among the pieces a peer can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Prefer pieces held by the fewest peers.
    #[default]
    RarestFirst,
    /// Plain index order; handy for tests and tiny swarms.
    Sequential,
}

struct QueueState {
    pieces: Vec<Piece>,
    availability: Vec<usize>,
    /// buckets[a] holds the pending pieces with availability a.
    buckets: Vec<HashSet<usize>>,
    in_progress: HashSet<usize>,
    completed: HashSet<usize>,
}

impl QueueState {
    fn ensure_bucket(&mut self, avail: usize) {
        while self.buckets.len() <= avail {
            self.buckets.push(HashSet::new());
        }
    }

    fn is_pending(&self, index: usize) -> bool {
        !self.completed.contains(&index) && !self.in_progress.contains(&index)
    }

    /// Adjusts one piece's availability, rehoming it if it is pending.
    fn shift_availability(&mut self, index: usize, up: bool) {
        let old = self.availability[index];
        let new = if up {
            old + 1
        } else if old > 0 {
            old - 1
        } else {
            return;
        };
        self.availability[index] = new;

        if self.is_pending(index) {
            if let Some(bucket) = self.buckets.get_mut(old) {
                bucket.remove(&index);
            }
            self.ensure_bucket(new);
            self.buckets[new].insert(index);
        }
    }
}

/// The scheduler shared by all peer sessions of one download.
///
/// Every operation takes the internal mutex briefly; nothing does I/O while
/// holding it. Sessions reference the queue, never the other way around.
pub struct PieceQueue {
    state: Mutex<QueueState>,
    strategy: SelectionStrategy,
}

impl PieceQueue {
    /// Builds the queue; pieces set in `completed` skip straight to the
    /// completed set (the resume path).
    pub fn new(pieces: Vec<Piece>, completed: &Bitfield, strategy: SelectionStrategy) -> Self {
        let count = pieces.len();
        let mut state = QueueState {
            pieces,
            availability: vec![0; count],
            buckets: vec![HashSet::new()],
            in_progress: HashSet::new(),
            completed: HashSet::new(),
        };
        for index in 0..count {
            if completed.get(index) {
                state.completed.insert(index);
            } else {
                state.buckets[0].insert(index);
            }
        }
        Self {
            state: Mutex::new(state),
            strategy,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.state.lock().pieces.len()
    }

    /// Counts a newly connected peer's pieces into the availability index.
    pub fn register_peer(&self, bitfield: &Bitfield) {
        let mut state = self.state.lock();
        for index in 0..state.pieces.len() {
            if bitfield.get(index) {
                state.shift_availability(index, true);
            }
        }
    }

    /// Removes a departed peer's pieces from the availability index.
    pub fn unregister_peer(&self, bitfield: &Bitfield) {
        let mut state = self.state.lock();
        for index in 0..state.pieces.len() {
            if bitfield.get(index) {
                state.shift_availability(index, false);
            }
        }
    }

    /// A session saw a `have` for this piece.
    pub fn bump(&self, index: usize) {
        let mut state = self.state.lock();
        if index < state.pieces.len() {
            state.shift_availability(index, true);
        }
    }

    /// Picks the next piece the given peer should fetch and marks it in
    /// progress. `None` means the peer currently has nothing we want.
    pub fn get(&self, peer_bitfield: &Bitfield) -> Option<Piece> {
        let mut state = self.state.lock();

        let index = match self.strategy {
            SelectionStrategy::RarestFirst => {
                // Scan buckets from rarest upward; any piece within a
                // bucket is an acceptable tie-break.
                let mut found = None;
                'scan: for avail in 0..state.buckets.len() {
                    for &index in &state.buckets[avail] {
                        if peer_bitfield.get(index) {
                            found = Some(index);
                            break 'scan;
                        }
                    }
                }
                found?
            }
            SelectionStrategy::Sequential => (0..state.pieces.len())
                .find(|&index| state.is_pending(index) && peer_bitfield.get(index))?,
        };

        let avail = state.availability[index];
        state.buckets[avail].remove(&index);
        state.in_progress.insert(index);
        Some(state.pieces[index].clone())
    }

    /// Marks a piece verified and written.
    pub fn complete(&self, index: usize) {
        let mut state = self.state.lock();
        state.in_progress.remove(&index);
        state.completed.insert(index);
    }

    /// Returns an in-progress piece to pending, keeping its availability.
    pub fn put_back(&self, index: usize) {
        let mut state = self.state.lock();
        if state.in_progress.remove(&index) {
            let avail = state.availability[index];
            state.ensure_bucket(avail);
            state.buckets[avail].insert(index);
        }
    }

    pub fn has_pending(&self) -> bool {
        self.state
            .lock()
            .buckets
            .iter()
            .any(|bucket| !bucket.is_empty())
    }

    pub fn has_in_progress(&self) -> bool {
        !self.state.lock().in_progress.is_empty()
    }

    pub fn all_complete(&self) -> bool {
        let state = self.state.lock();
        state.completed.len() == state.pieces.len()
    }

    pub fn completed_count(&self) -> usize {
        self.state.lock().completed.len()
    }

    /// Availability of one piece, exposed for tests.
    #[cfg(test)]
    pub(crate) fn availability(&self, index: usize) -> usize {
        self.state.lock().availability[index]
    }
}
