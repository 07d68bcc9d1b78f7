use std::collections::VecDeque;

use parking_lot::RwLock;

use super::node::{Node, NodeId};
use crate::constants::{DHT_BUCKET_STALE, DHT_K, DHT_NUM_BUCKETS};

/// One k-bucket, kept in LRU order: least recently seen at the front.
#[derive(Debug, Default)]
struct Bucket {
    nodes: VecDeque<Node>,
}

impl Bucket {
    /// Adds or refreshes a node. A full bucket rejects newcomers; we accept
    /// this simplification instead of pinging the LRU entry for eviction.
    fn add(&mut self, node: Node) -> bool {
        if let Some(pos) = self.nodes.iter().position(|n| n.id == node.id) {
            if let Some(mut existing) = self.nodes.remove(pos) {
                existing.touch();
                existing.addr = node.addr;
                self.nodes.push_back(existing);
            }
            return true;
        }
        if self.nodes.len() < DHT_K {
            self.nodes.push_back(node);
            return true;
        }
        false
    }

    /// The most recently contacted node, if any.
    fn newest(&self) -> Option<&Node> {
        self.nodes.back()
    }
}

/// 160 k-buckets of up to 8 nodes each, indexed by the leading-zero count
/// of the XOR distance from our own id. Our id is never inserted.
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<RwLock<Bucket>>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId) -> Self {
        let buckets = (0..DHT_NUM_BUCKETS)
            .map(|_| RwLock::new(Bucket::default()))
            .collect();
        Self { self_id, buckets }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    /// Records contact with a node: inserted, or moved to the MRU end.
    pub fn add_node(&self, node: Node) -> bool {
        if node.id == self.self_id {
            return false;
        }
        let index = self.self_id.bucket_index(&node.id);
        self.buckets[index].write().add(node)
    }

    /// The `count` nodes closest to `target` by XOR distance.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<Node> {
        let mut nodes = self.all_nodes();
        nodes.sort_by_key(|node| node.id.distance(target));
        nodes.truncate(count);
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().nodes.len()).sum()
    }

    pub fn all_nodes(&self) -> Vec<Node> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.read().nodes.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Indices of non-empty buckets with no recent contact.
    pub fn stale_buckets(&self) -> Vec<usize> {
        let mut stale = Vec::new();
        for (index, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.read();
            if let Some(newest) = bucket.newest() {
                if newest.last_seen.elapsed() > DHT_BUCKET_STALE {
                    stale.push(index);
                }
            }
        }
        stale
    }
}
