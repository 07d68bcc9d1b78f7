use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;

use super::*;

fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)), 6881)
}

#[test]
fn distance_is_xor() {
    let mut a = [0u8; 20];
    a[0] = 0xFF;
    let mut b = [0u8; 20];
    b[0] = 0x0F;

    let dist = NodeId(a).distance(&NodeId(b));
    assert_eq!(dist[0], 0xF0);
    assert_eq!(&dist[1..], &[0u8; 19]);

    // Zero leading zero bits puts this pair in bucket 0.
    assert_eq!(NodeId(a).bucket_index(&NodeId(b)), 0);
}

#[test]
fn distance_to_self_is_zero() {
    let id = NodeId::generate();
    assert_eq!(id.distance(&id), [0u8; 20]);
    // An identical id maps to the highest bucket.
    assert_eq!(id.bucket_index(&id), 159);
}

#[test]
fn bucket_index_counts_leading_zeros() {
    let zero = NodeId([0u8; 20]);
    let mut one_high = [0u8; 20];
    one_high[0] = 0x80;
    assert_eq!(zero.bucket_index(&NodeId(one_high)), 0);

    let mut low = [0u8; 20];
    low[19] = 0x01;
    assert_eq!(zero.bucket_index(&NodeId(low)), 159);
}

#[test]
fn random_id_in_bucket_lands_in_that_bucket() {
    let id = NodeId::generate();
    for bucket in [0, 7, 47, 100, 159] {
        let target = id.random_id_in_bucket(bucket);
        assert_eq!(id.bucket_index(&target), bucket, "bucket {}", bucket);
    }
}

#[test]
fn compact_node_roundtrip_v4() {
    let node = Node::new(NodeId([1u8; 20]), addr(7));
    let compact = node.to_compact();
    assert_eq!(compact.len(), 26);

    let parsed = Node::from_compact(&compact).unwrap();
    assert_eq!(parsed.id, node.id);
    assert_eq!(parsed.addr, node.addr);
}

#[test]
fn compact_node_roundtrip_v6() {
    let v6 = SocketAddr::new(
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
        6881,
    );
    let node = Node::new(NodeId([2u8; 20]), v6);
    let compact = node.to_compact();
    assert_eq!(compact.len(), 38);

    let parsed = Node::from_compact(&compact).unwrap();
    assert_eq!(parsed.id, node.id);
    assert_eq!(parsed.addr, v6);
}

#[test]
fn compact_node_rejects_bad_lengths() {
    assert!(Node::from_compact(&[0u8; 25]).is_none());
    assert!(Node::from_compact(&[0u8; 27]).is_none());
}

#[test]
fn krpc_ping_canonical_encoding() {
    let id = NodeId(*b"abcdefghij0123456789");
    let msg = KrpcMessage::query(Bytes::from_static(b"aa"), id, KrpcQuery::Ping);
    assert_eq!(
        msg.encode(),
        b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe"
    );

    let parsed = KrpcMessage::parse(&msg.encode()).unwrap();
    assert_eq!(parsed.transaction_id, Bytes::from_static(b"aa"));
    assert_eq!(parsed.sender_id(), Some(id));
    assert!(matches!(
        parsed.body,
        KrpcBody::Query {
            query: KrpcQuery::Ping,
            ..
        }
    ));
}

#[test]
fn krpc_find_node_roundtrip() {
    let id = NodeId::generate();
    let target = NodeId::generate();
    let msg = KrpcMessage::query(
        Bytes::from_static(b"bb"),
        id,
        KrpcQuery::FindNode { target },
    );

    let parsed = KrpcMessage::parse(&msg.encode()).unwrap();
    match parsed.body {
        KrpcBody::Query {
            query: KrpcQuery::FindNode { target: t },
            ..
        } => assert_eq!(t, target),
        other => panic!("expected find_node, got {:?}", other),
    }
}

#[test]
fn krpc_get_peers_response_roundtrip() {
    let response = KrpcResponse {
        id: Some(NodeId([9u8; 20])),
        token: Some(Bytes::from_static(b"12345678")),
        nodes: vec![Node::new(NodeId([1u8; 20]), addr(1))],
        peers: vec![addr(2), addr(3)],
    };
    let msg = KrpcMessage::response(Bytes::from_static(b"cc"), response);

    let parsed = KrpcMessage::parse(&msg.encode()).unwrap();
    match parsed.body {
        KrpcBody::Response(r) => {
            assert_eq!(r.id, Some(NodeId([9u8; 20])));
            assert_eq!(r.token.as_deref(), Some(b"12345678".as_slice()));
            assert_eq!(r.nodes.len(), 1);
            assert_eq!(r.nodes[0].addr, addr(1));
            assert_eq!(r.peers, vec![addr(2), addr(3)]);
        }
        other => panic!("expected response, got {:?}", other),
    }
}

#[test]
fn krpc_error_roundtrip() {
    let msg = KrpcMessage::error(Bytes::from_static(b"ee"), 203, "Protocol Error");
    let parsed = KrpcMessage::parse(&msg.encode()).unwrap();
    match parsed.body {
        KrpcBody::Error { code, message } => {
            assert_eq!(code, 203);
            assert_eq!(message, "Protocol Error");
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn krpc_rejects_garbage() {
    assert!(KrpcMessage::parse(b"not bencode").is_err());
    assert!(KrpcMessage::parse(b"d1:y1:qe").is_err());
}

#[test]
fn routing_table_places_nodes_by_distance() {
    let self_id = NodeId([0u8; 20]);
    let table = RoutingTable::new(self_id);

    let mut near = [0u8; 20];
    near[19] = 0x01;
    table.add_node(Node::new(NodeId(near), addr(1)));

    let mut far = [0u8; 20];
    far[0] = 0x80;
    table.add_node(Node::new(NodeId(far), addr(2)));

    assert_eq!(table.node_count(), 2);
    let closest = table.closest(&NodeId([0u8; 20]), 1);
    assert_eq!(closest[0].id, NodeId(near));
}

#[test]
fn routing_table_never_stores_self() {
    let self_id = NodeId::generate();
    let table = RoutingTable::new(self_id);
    assert!(!table.add_node(Node::new(self_id, addr(1))));
    assert_eq!(table.node_count(), 0);
}

#[test]
fn full_bucket_rejects_newcomers() {
    // All ids with the same first byte land in the same bucket relative
    // to a zero self id.
    let table = RoutingTable::new(NodeId([0u8; 20]));
    for i in 0..10u8 {
        let mut id = [0u8; 20];
        id[0] = 0x80;
        id[19] = i;
        let accepted = table.add_node(Node::new(NodeId(id), addr(i)));
        assert_eq!(accepted, i < 8, "node {}", i);
    }
    assert_eq!(table.node_count(), 8);
}

#[test]
fn re_adding_known_node_refreshes_it() {
    let table = RoutingTable::new(NodeId([0u8; 20]));
    let mut id = [0u8; 20];
    id[0] = 0x80;
    let node = Node::new(NodeId(id), addr(1));

    assert!(table.add_node(node.clone()));
    // A full bucket still accepts contact from a node it already holds.
    assert!(table.add_node(node));
    assert_eq!(table.node_count(), 1);
}

#[test]
fn transaction_ids_are_two_bytes_and_distinct() {
    let manager = TransactionManager::new();
    let a = manager.next_id();
    let b = manager.next_id();
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert_ne!(a, b);
}

#[tokio::test]
async fn transaction_delivery_is_one_shot() {
    let manager = TransactionManager::new();
    let tid = manager.next_id();
    let rx = manager.register(tid.clone(), "ping", addr(1));

    let delivered = manager.complete(
        &tid,
        KrpcResponse {
            id: Some(NodeId([1u8; 20])),
            ..Default::default()
        },
    );
    assert!(delivered);
    assert_eq!(manager.pending_count(), 0);

    let response = rx.await.unwrap();
    assert_eq!(response.id, Some(NodeId([1u8; 20])));

    // A second completion for the same id has nowhere to go.
    assert!(!manager.complete(&tid, KrpcResponse::default()));
}

#[tokio::test]
async fn unknown_transaction_is_dropped() {
    let manager = TransactionManager::new();
    assert!(!manager.complete(&Bytes::from_static(b"zz"), KrpcResponse::default()));
}

#[test]
fn snapshot_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.json");

    let table = RoutingTable::new(NodeId([0u8; 20]));
    for i in 1..=5u8 {
        let mut id = [0u8; 20];
        id[0] = i;
        table.add_node(Node::new(NodeId(id), addr(i)));
    }
    assert_eq!(table.save_snapshot(&path).unwrap(), 5);

    let restored = RoutingTable::new(NodeId([0u8; 20]));
    assert_eq!(restored.load_snapshot(&path).unwrap(), 5);
    assert_eq!(restored.node_count(), 5);
}

#[test]
fn snapshot_missing_file_is_empty() {
    let table = RoutingTable::new(NodeId::generate());
    let loaded = table
        .load_snapshot(std::path::Path::new("/nonexistent/undertow-nodes.json"))
        .unwrap();
    assert_eq!(loaded, 0);
}
