use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::DhtError;
use super::message::{KrpcBody, KrpcMessage, KrpcQuery, KrpcResponse};
use super::node::{Node, NodeId};
use super::routing::RoutingTable;
use super::transactions::TransactionManager;
use crate::constants::{
    DHT_ALPHA, DHT_BOOTSTRAP_NODES, DHT_K, DHT_LOOKUP_BUDGET, DHT_MAX_ITERATIONS,
    DHT_PEERS_EARLY_RETURN, DHT_PORT_RANGE, DHT_REFRESH_INTERVAL, KRPC_QUERY_TIMEOUT,
};

/// Announced peers are kept this long.
const PEER_LIFETIME: Duration = Duration::from_secs(30 * 60);
/// Cap per info-hash in the peer store.
const MAX_STORED_PEERS: usize = 1000;

struct StoredPeer {
    addr: SocketAddr,
    announced_at: Instant,
}

#[derive(Default)]
struct PeerStore {
    peers: HashMap<[u8; 20], Vec<StoredPeer>>,
}

impl PeerStore {
    fn add(&mut self, info_hash: [u8; 20], addr: SocketAddr) {
        let entry = self.peers.entry(info_hash).or_default();
        let now = Instant::now();
        entry.retain(|p| now.duration_since(p.announced_at) < PEER_LIFETIME && p.addr != addr);
        if entry.len() < MAX_STORED_PEERS {
            entry.push(StoredPeer {
                addr,
                announced_at: now,
            });
        }
    }

    fn get(&mut self, info_hash: &[u8; 20]) -> Vec<SocketAddr> {
        let now = Instant::now();
        match self.peers.get_mut(info_hash) {
            Some(entry) => {
                entry.retain(|p| now.duration_since(p.announced_at) < PEER_LIFETIME);
                entry.iter().map(|p| p.addr).collect()
            }
            None => Vec::new(),
        }
    }
}

/// A read-only DHT node.
///
/// Discovers peers for info-hashes via iterative `get_peers` lookups and
/// answers `ping`/`find_node`/`get_peers` so the swarm keeps us in routing
/// tables. `announce_peer` is accepted and stored but never originated,
/// and tokens in received announces are not validated.
pub struct DhtServer {
    socket: UdpSocket,
    node_id: NodeId,
    routing: RoutingTable,
    transactions: TransactionManager,
    peer_store: RwLock<PeerStore>,
    port: u16,
}

impl DhtServer {
    /// Binds the first free UDP port in the standard DHT range.
    pub async fn bind() -> Result<Self, DhtError> {
        let mut socket = None;
        for port in DHT_PORT_RANGE {
            if let Ok(bound) = UdpSocket::bind(("0.0.0.0", port)).await {
                socket = Some((bound, port));
                break;
            }
        }
        let (socket, port) = socket.ok_or(DhtError::BindFailed)?;
        let node_id = NodeId::generate();

        info!(port, id = %node_id, "DHT node listening");

        Ok(Self {
            socket,
            node_id,
            routing: RoutingTable::new(node_id),
            transactions: TransactionManager::new(),
            peer_store: RwLock::new(PeerStore::default()),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing
    }

    /// Pings the well-known entry points, then walks toward our own id to
    /// populate the neighborhood buckets.
    pub async fn bootstrap(&self) {
        let mut addrs = Vec::new();
        for host in DHT_BOOTSTRAP_NODES {
            match tokio::net::lookup_host(host).await {
                Ok(resolved) => addrs.extend(resolved.filter(|a| a.is_ipv4()).take(1)),
                Err(e) => warn!(host = %host, "failed to resolve bootstrap node: {}", e),
            }
        }

        join_all(addrs.iter().map(|&addr| self.ping(addr))).await;

        if let Err(e) = self.find_node(self.node_id).await {
            debug!("bootstrap find_node failed: {}", e);
        }
        info!(
            nodes = self.routing.node_count(),
            "DHT bootstrap complete"
        );
    }

    /// Sends a ping; the responding node lands in the routing table.
    pub async fn ping(&self, addr: SocketAddr) -> Result<NodeId, DhtError> {
        let response = self.query(addr, KrpcQuery::Ping).await?;
        response.id.ok_or_else(|| {
            DhtError::InvalidMessage("ping response without node id".into())
        })
    }

    /// One round of parallel `find_node` toward `target`; discovered nodes
    /// are merged into the routing table and returned.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<Node>, DhtError> {
        let closest = self.routing.closest(&target, DHT_K);
        if closest.is_empty() {
            return Err(DhtError::NoNodes);
        }

        let results = join_all(
            closest
                .iter()
                .map(|node| self.query(node.addr, KrpcQuery::FindNode { target })),
        )
        .await;

        let mut found = Vec::new();
        for result in results {
            match result {
                Ok(response) => {
                    for node in response.nodes {
                        self.routing.add_node(node.clone());
                        found.push(node);
                    }
                }
                Err(e) => debug!("find_node query failed: {}", e),
            }
        }
        Ok(found)
    }

    /// Iterative `get_peers` lookup.
    ///
    /// Seeds with the k closest routing-table nodes, queries α of the
    /// closest unqueried candidates per round, merges `nodes` back into the
    /// candidate set, and aggregates deduplicated `values`. Stops when a
    /// round yields no node closer than the best seen, on the iteration
    /// cap, on the time budget, or once enough peers have been collected.
    pub async fn get_peers(&self, info_hash: [u8; 20]) -> Result<Vec<SocketAddr>, DhtError> {
        let target = NodeId(info_hash);
        let deadline = Instant::now() + DHT_LOOKUP_BUDGET;

        let mut candidates = self.routing.closest(&target, DHT_K);
        if candidates.is_empty() {
            return Err(DhtError::NoNodes);
        }

        let mut peers: Vec<SocketAddr> = Vec::new();
        let mut seen_peers: HashSet<SocketAddr> = HashSet::new();
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut best = candidates
            .iter()
            .map(|n| n.id.distance(&target))
            .min()
            .unwrap_or([0xFF; 20]);

        for _ in 0..DHT_MAX_ITERATIONS {
            if Instant::now() >= deadline {
                break;
            }

            candidates.sort_by(|a, b| a.id.distance(&target).cmp(&b.id.distance(&target)));
            let round: Vec<Node> = candidates
                .iter()
                .filter(|n| !queried.contains(&n.id))
                .take(DHT_ALPHA)
                .cloned()
                .collect();
            if round.is_empty() {
                break;
            }
            queried.extend(round.iter().map(|n| n.id));

            let results = join_all(
                round
                    .iter()
                    .map(|node| self.query(node.addr, KrpcQuery::GetPeers { info_hash })),
            )
            .await;

            let mut progressed = false;
            for result in results {
                let Ok(response) = result else { continue };
                for peer in response.peers {
                    if seen_peers.insert(peer) {
                        peers.push(peer);
                    }
                }
                for node in response.nodes {
                    self.routing.add_node(node.clone());
                    if !queried.contains(&node.id) {
                        let dist = node.id.distance(&target);
                        if dist < best {
                            best = dist;
                            progressed = true;
                        }
                        candidates.push(node);
                    }
                }
            }

            if peers.len() >= DHT_PEERS_EARLY_RETURN || !progressed {
                break;
            }
        }

        info!(
            peers = peers.len(),
            queried = queried.len(),
            "DHT get_peers lookup finished"
        );
        Ok(peers)
    }

    /// Sends one query and waits for its response.
    async fn query(&self, addr: SocketAddr, query: KrpcQuery) -> Result<KrpcResponse, DhtError> {
        let transaction_id = self.transactions.next_id();
        let method = query.method();
        let message = KrpcMessage::query(transaction_id.clone(), self.node_id, query);

        let rx = self.transactions.register(transaction_id.clone(), method, addr);
        if let Err(e) = self.socket.send_to(&message.encode(), addr).await {
            self.transactions.forget(&transaction_id);
            return Err(e.into());
        }

        match timeout(KRPC_QUERY_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(DhtError::Timeout),
            Err(_) => {
                self.transactions.forget(&transaction_id);
                Err(DhtError::Timeout)
            }
        }
    }

    /// The receive loop plus periodic maintenance. Runs until the socket
    /// errors or the task is dropped.
    pub async fn run(&self) -> Result<(), DhtError> {
        let mut buf = vec![0u8; 65536];
        let mut refresh = tokio::time::interval(DHT_REFRESH_INTERVAL);
        let mut sweep = tokio::time::interval(Duration::from_secs(5));
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        refresh.tick().await;
        sweep.tick().await;

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (n, addr) = received?;
                    match KrpcMessage::parse(&buf[..n]) {
                        Ok(message) => self.handle_message(message, addr).await,
                        Err(e) => debug!(%addr, "dropping malformed packet: {}", e),
                    }
                }
                _ = refresh.tick() => self.refresh_stale_buckets().await,
                _ = sweep.tick() => {
                    let expired = self.transactions.expire();
                    if expired > 0 {
                        debug!(expired, "expired pending DHT queries");
                    }
                }
            }
        }
    }

    async fn refresh_stale_buckets(&self) {
        let stale = self.routing.stale_buckets();
        if stale.is_empty() {
            return;
        }
        debug!(buckets = stale.len(), "refreshing stale DHT buckets");
        for index in stale {
            let target = self.node_id.random_id_in_bucket(index);
            let _ = self.find_node(target).await;
        }
    }

    async fn handle_message(&self, message: KrpcMessage, addr: SocketAddr) {
        if let Some(id) = message.sender_id() {
            self.routing.add_node(Node::new(id, addr));
        }

        match message.body {
            KrpcBody::Response(response) => {
                if !self.transactions.complete(&message.transaction_id, response) {
                    debug!(%addr, "response for unknown transaction");
                }
            }
            KrpcBody::Error { code, message: text } => {
                debug!(%addr, code, "KRPC error: {}", text);
                self.transactions.forget(&message.transaction_id);
            }
            KrpcBody::Query { query, .. } => {
                self.handle_query(message.transaction_id, query, addr).await;
            }
        }
    }

    async fn handle_query(&self, transaction_id: Bytes, query: KrpcQuery, addr: SocketAddr) {
        let reply = match query {
            KrpcQuery::Ping => KrpcMessage::response(
                transaction_id,
                KrpcResponse {
                    id: Some(self.node_id),
                    ..Default::default()
                },
            ),
            KrpcQuery::FindNode { target } => KrpcMessage::response(
                transaction_id,
                KrpcResponse {
                    id: Some(self.node_id),
                    nodes: self.routing.closest(&target, DHT_K),
                    ..Default::default()
                },
            ),
            KrpcQuery::GetPeers { info_hash } => {
                let stored = self.peer_store.write().get(&info_hash);
                let nodes = if stored.is_empty() {
                    self.routing.closest(&NodeId(info_hash), DHT_K)
                } else {
                    Vec::new()
                };
                KrpcMessage::response(
                    transaction_id,
                    KrpcResponse {
                        id: Some(self.node_id),
                        token: Some(fresh_token()),
                        nodes,
                        peers: stored,
                    },
                )
            }
            KrpcQuery::AnnouncePeer {
                info_hash,
                port,
                implied_port,
                ..
            } => {
                // Read-only node: any token is accepted.
                let peer_port = if implied_port { addr.port() } else { port };
                let peer_addr = SocketAddr::new(addr.ip(), peer_port);
                self.peer_store.write().add(info_hash, peer_addr);
                KrpcMessage::response(
                    transaction_id,
                    KrpcResponse {
                        id: Some(self.node_id),
                        ..Default::default()
                    },
                )
            }
        };

        if let Err(e) = self.socket.send_to(&reply.encode(), addr).await {
            debug!(%addr, "failed to send reply: {}", e);
        }
    }
}

/// A fresh 8-byte token for every get_peers reply. Received announces are
/// not validated against it.
fn fresh_token() -> Bytes {
    let token: [u8; 8] = rand::random();
    Bytes::copy_from_slice(&token)
}
