//! Best-effort snapshot of the routing table.
//!
//! Nodes survive restarts as a small JSON file so bootstrap does not start
//! from nothing every run. Failures are the caller's to ignore; losing the
//! snapshot only costs a slower bootstrap.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::node::{Node, NodeId};
use super::routing::RoutingTable;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct NodesFile {
    version: u32,
    nodes: Vec<NodeEntry>,
}

#[derive(Serialize, Deserialize)]
struct NodeEntry {
    /// Hex-encoded node id.
    id: String,
    /// `ip:port`.
    addr: String,
}

impl RoutingTable {
    /// Writes all known nodes to `path`. Returns how many were written.
    pub fn save_snapshot(&self, path: &Path) -> std::io::Result<usize> {
        let nodes = self.all_nodes();
        if nodes.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = NodesFile {
            version: SNAPSHOT_VERSION,
            nodes: nodes
                .iter()
                .map(|node| NodeEntry {
                    id: node.id.to_string(),
                    addr: node.addr.to_string(),
                })
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        std::fs::write(path, data)?;
        Ok(file.nodes.len())
    }

    /// Loads a snapshot into the table, skipping entries that no longer
    /// parse. Returns how many nodes were accepted. A missing file is not
    /// an error.
    pub fn load_snapshot(&self, path: &Path) -> std::io::Result<usize> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let file: NodesFile = serde_json::from_slice(&data)?;

        let mut loaded = 0;
        for entry in file.nodes {
            let Some(id) = parse_hex_id(&entry.id) else {
                continue;
            };
            let Ok(addr) = entry.addr.parse::<SocketAddr>() else {
                continue;
            };
            if self.add_node(Node::new(id, addr)) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

fn parse_hex_id(hex: &str) -> Option<NodeId> {
    if hex.len() != 40 {
        return None;
    }
    let mut id = [0u8; 20];
    for (i, byte) in id.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(NodeId(id))
}
