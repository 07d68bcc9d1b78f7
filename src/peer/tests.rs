use bytes::Bytes;

use super::*;

fn make_pieces(count: usize) -> Vec<Piece> {
    (0..count)
        .map(|index| Piece {
            index,
            hash: [index as u8; 20],
            length: 16384,
        })
        .collect()
}

fn bitfield_with(len: usize, set: &[usize]) -> Bitfield {
    let mut bf = Bitfield::new(len);
    for &i in set {
        bf.set(i);
    }
    bf
}

#[test]
fn bitfield_bit_order_is_msb_first() {
    let bf = Bitfield::from_bytes(Bytes::from_static(&[0b1100_1100, 0b1010_1010]), 16);
    let expected = [
        true, true, false, false, true, true, false, false, true, false, true, false, true, false,
        true, false,
    ];
    for (i, &want) in expected.iter().enumerate() {
        assert_eq!(bf.get(i), want, "bit {}", i);
    }
}

#[test]
fn bitfield_out_of_range_is_safe() {
    let mut bf = Bitfield::new(10);
    assert!(!bf.get(10));
    assert!(!bf.get(1000));
    bf.set(10);
    bf.clear(1000);
    assert_eq!(bf.count_ones(), 0);
}

#[test]
fn bitfield_set_get_clear() {
    let mut bf = Bitfield::new(100);
    bf.set(0);
    bf.set(99);
    assert!(bf.get(0));
    assert!(bf.get(99));
    assert_eq!(bf.count_ones(), 2);
    bf.clear(0);
    assert!(!bf.get(0));
}

#[test]
fn bitfield_accepts_oversized_payload() {
    // Two bytes of wire data for a 9-piece torrent; spare bits ignored.
    let bf = Bitfield::from_bytes(Bytes::from_static(&[0xFF, 0xFF]), 9);
    assert_eq!(bf.count_ones(), 9);
    assert!(bf.is_complete());
    assert!(!bf.get(9));
}

#[test]
fn bitfield_full_masks_spare_bits() {
    let bf = Bitfield::full(9);
    assert_eq!(bf.count_ones(), 9);
    assert_eq!(bf.as_bytes(), &[0xFF, 0x80]);
}

#[test]
fn handshake_roundtrip_with_flags() {
    let handshake = Handshake::new([1u8; 20], [2u8; 20]);
    assert_eq!(handshake.reserved[5], 0x10);
    assert_eq!(handshake.reserved[7], 0x01);

    let encoded = handshake.encode();
    assert_eq!(encoded.len(), 68);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, [1u8; 20]);
    assert_eq!(decoded.peer_id, [2u8; 20]);
    assert!(decoded.supports_extension_protocol());
    assert!(decoded.supports_dht());
}

#[test]
fn handshake_rejects_wrong_protocol() {
    let mut bad = Handshake::new([1u8; 20], [2u8; 20]).encode().to_vec();
    bad[5] = b'X';
    assert!(Handshake::decode(&bad).is_err());
    assert!(Handshake::decode(&bad[..60]).is_err());
}

#[test]
fn port_message_wire_form() {
    let encoded = Message::Port(6881).encode();
    assert_eq!(encoded.as_ref(), &[0, 0, 0, 3, 9, 0x1A, 0xE1]);

    match Message::decode(encoded).unwrap() {
        Message::Port(port) => assert_eq!(port, 6881),
        other => panic!("expected port, got {:?}", other),
    }
}

#[test]
fn message_roundtrips() {
    let messages = vec![
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xF0, 0x0F])),
        Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        },
        Message::Cancel {
            index: 1,
            begin: 16384,
            length: 16384,
        },
        Message::Port(6881),
        Message::Extended {
            id: 3,
            payload: Bytes::from_static(b"d1:xi1ee"),
        },
    ];

    for msg in messages {
        let encoded = msg.encode();
        let decoded = Message::decode(encoded.clone()).unwrap();
        assert_eq!(decoded.encode(), encoded);
    }
}

#[test]
fn piece_message_roundtrip() {
    let data = Bytes::from_static(b"block bytes");
    let msg = Message::Piece {
        index: 7,
        begin: 16384,
        data: data.clone(),
    };
    match Message::decode(msg.encode()).unwrap() {
        Message::Piece {
            index,
            begin,
            data: decoded,
        } => {
            assert_eq!(index, 7);
            assert_eq!(begin, 16384);
            assert_eq!(decoded, data);
        }
        other => panic!("expected piece, got {:?}", other),
    }
}

#[test]
fn keepalive_decodes_from_zero_length() {
    let decoded = Message::decode(Bytes::from_static(&[0, 0, 0, 0])).unwrap();
    assert!(matches!(decoded, Message::KeepAlive));
}

#[test]
fn unknown_message_id_is_rejected() {
    let frame = Bytes::from_static(&[0, 0, 0, 1, 99]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::UnknownMessageId(99))
    ));
}

#[test]
fn extension_handshake_roundtrip() {
    let mut hs = ExtensionHandshake::new();
    hs.extensions.insert("ut_metadata".into(), 3);
    hs.metadata_size = Some(31337);
    hs.client = Some("undertow 0.1".into());

    let decoded = ExtensionHandshake::decode(&hs.encode()).unwrap();
    assert_eq!(decoded.extension_id("ut_metadata"), Some(3));
    assert_eq!(decoded.metadata_size, Some(31337));
    assert_eq!(decoded.client.as_deref(), Some("undertow 0.1"));
}

#[test]
fn extension_handshake_drops_disabled_entries() {
    // Id zero disables an extension on the sender's side.
    let raw = b"d1:md11:ut_metadatai0eee";
    let decoded = ExtensionHandshake::decode(raw).unwrap();
    assert_eq!(decoded.extension_id("ut_metadata"), None);
}

#[test]
fn peer_id_has_client_tag() {
    let id = PeerId::generate();
    assert_eq!(id.client_tag(), Some("UW0001"));
    assert_ne!(id.0, PeerId::generate().0);
}

#[test]
fn queue_rarest_first_prefers_low_availability() {
    let queue = PieceQueue::new(
        make_pieces(5),
        &Bitfield::new(5),
        SelectionStrategy::RarestFirst,
    );

    // Peer A has {0,1,2}, peer B has {1,2,3}; piece 4 is held by nobody.
    queue.register_peer(&bitfield_with(5, &[0, 1, 2]));
    queue.register_peer(&bitfield_with(5, &[1, 2, 3]));

    let everything = Bitfield::full(5);
    let first = queue.get(&everything).unwrap();
    assert_eq!(first.index, 4, "availability 0 comes first");

    let second = queue.get(&everything).unwrap();
    assert!(
        second.index == 0 || second.index == 3,
        "availability 1 next, got {}",
        second.index
    );
}

#[test]
fn queue_get_respects_peer_bitfield() {
    let queue = PieceQueue::new(
        make_pieces(4),
        &Bitfield::new(4),
        SelectionStrategy::RarestFirst,
    );
    let only_two = bitfield_with(4, &[2]);
    assert_eq!(queue.get(&only_two).unwrap().index, 2);
    // Piece 2 is now in progress; the same peer has nothing else.
    assert!(queue.get(&only_two).is_none());
}

#[test]
fn queue_put_back_keeps_availability() {
    let queue = PieceQueue::new(
        make_pieces(3),
        &Bitfield::new(3),
        SelectionStrategy::RarestFirst,
    );
    queue.register_peer(&bitfield_with(3, &[0]));
    assert_eq!(queue.availability(0), 1);

    let piece = queue.get(&Bitfield::full(3)).unwrap();
    let before = queue.availability(piece.index);
    queue.put_back(piece.index);
    assert_eq!(queue.availability(piece.index), before);

    // The piece is selectable again.
    assert!(queue.get(&Bitfield::full(3)).is_some());
}

#[test]
fn queue_state_partition_invariant() {
    let queue = PieceQueue::new(
        make_pieces(6),
        &Bitfield::new(6),
        SelectionStrategy::Sequential,
    );
    queue.register_peer(&Bitfield::full(6));

    let everything = Bitfield::full(6);
    let a = queue.get(&everything).unwrap();
    let b = queue.get(&everything).unwrap();
    queue.complete(a.index);
    queue.put_back(b.index);

    // completed=1, in_progress=0, pending=5; the partition covers all six.
    assert_eq!(queue.completed_count(), 1);
    assert!(!queue.has_in_progress());
    assert!(queue.has_pending());
    assert!(!queue.all_complete());

    let mut drained = 0;
    while queue.get(&everything).is_some() {
        drained += 1;
    }
    assert_eq!(drained, 5);
}

#[test]
fn queue_sequential_order() {
    let queue = PieceQueue::new(
        make_pieces(4),
        &Bitfield::new(4),
        SelectionStrategy::Sequential,
    );
    let everything = Bitfield::full(4);
    for expected in 0..4 {
        assert_eq!(queue.get(&everything).unwrap().index, expected);
    }
    assert!(queue.get(&everything).is_none());
}

#[test]
fn queue_seeded_with_completed_bitfield() {
    let mut done = Bitfield::new(4);
    done.set(0);
    done.set(2);
    let queue = PieceQueue::new(make_pieces(4), &done, SelectionStrategy::Sequential);

    assert_eq!(queue.completed_count(), 2);
    let everything = Bitfield::full(4);
    assert_eq!(queue.get(&everything).unwrap().index, 1);
    assert_eq!(queue.get(&everything).unwrap().index, 3);
    queue.complete(1);
    queue.complete(3);
    assert!(queue.all_complete());
}

#[test]
fn queue_unregister_demotes_availability() {
    let queue = PieceQueue::new(
        make_pieces(2),
        &Bitfield::new(2),
        SelectionStrategy::RarestFirst,
    );
    let bf = Bitfield::full(2);
    queue.register_peer(&bf);
    queue.register_peer(&bf);
    assert_eq!(queue.availability(0), 2);
    queue.unregister_peer(&bf);
    assert_eq!(queue.availability(0), 1);
    // Still selectable after the demotion.
    assert!(queue.get(&bf).is_some());
}

#[test]
fn queue_bump_matches_single_bit_register() {
    let queue = PieceQueue::new(
        make_pieces(3),
        &Bitfield::new(3),
        SelectionStrategy::RarestFirst,
    );
    queue.bump(1);
    queue.bump(1);
    assert_eq!(queue.availability(1), 2);
    assert_eq!(queue.availability(0), 0);

    // Rarest-first now avoids piece 1 until the others are taken.
    let everything = Bitfield::full(3);
    let first = queue.get(&everything).unwrap();
    assert_ne!(first.index, 1);
}
