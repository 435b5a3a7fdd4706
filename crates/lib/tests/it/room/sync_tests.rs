//! Multi-client synchronization: acks, conflicts, convergence and idempotence.

use canopy::{
    LiveValue, NodeId, Room, RoomConfig,
    crdt::ListChange,
    op::{CreateKind, CreateOp, Intent, Op},
    position::Position,
    room::SubscribeOptions,
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde_json::json;

use crate::helpers::*;

fn network_with_list(clients: usize) -> (Network, NodeId) {
    let mut network = Network::with_setup(clients, |room| {
        room.object_set(&NodeId::root(), "items", LiveValue::list(["seed"]))
            .unwrap();
        room.object_set(&NodeId::root(), "doc", LiveValue::object([("v", 0)]))
            .unwrap();
    });
    let list = network.room(0).child(&NodeId::root(), "items").unwrap().unwrap();
    (network, list)
}

// ===== ACKNOWLEDGMENT =====

#[test]
fn test_echo_acknowledges_pending_ops() {
    let (mut network, list) = network_with_list(1);
    network.room(0).list_push(&list, "a").unwrap();
    network.room(0).object_set(&NodeId::root(), "k", 1).unwrap();
    assert_eq!(network.room(0).pending().len(), 2);

    network.sync();

    assert!(network.room(0).pending().is_empty());
    network.assert_converged();
}

#[test]
fn test_ack_at_other_position_moves_item() {
    let (mut room, list) = room_with_list(1);
    room.list_push(&list, "a").unwrap();
    let child = room.list_push(&list, "b").unwrap();
    let mut echo = room.pending().iter().last().unwrap().op.clone();
    let recorded = record_updates(&mut room, &list, SubscribeOptions::default());

    // The server put "b" before "a".
    let first = Position::parse(room.parent_of(&room.list_child(&list, 0).unwrap().unwrap()).unwrap().unwrap().key).unwrap();
    let settled = Position::before(&first);
    if let Op::Create(create) = &mut echo {
        create.parent_key = settled.to_string();
    }
    room.apply_remote_operations(&[echo]).unwrap();

    assert_eq!(list_json(&room, &list), json!(["b", "a"]));
    assert_eq!(room.list_child(&list, 0).unwrap(), Some(child));
    let recorded = recorded.borrow();
    assert_eq!(recorded.len(), 1);
    assert!(matches!(
        recorded[0][0].list_changes().unwrap(),
        [ListChange::Move {
            index: 0,
            previous_index: 1,
            ..
        }]
    ));
}

#[test]
fn test_ack_does_not_undo_a_later_local_move() {
    let (mut room, list) = room_with_list(1);
    room.list_push(&list, "a").unwrap();
    let child = room.list_push(&list, "b").unwrap();
    let echo = room.pending().iter().last().unwrap().op.clone();
    room.list_move(&list, 1, 0).unwrap();

    let mut moved_echo = echo;
    if let Op::Create(create) = &mut moved_echo {
        create.parent_key = Position::after(&Position::parse(create.parent_key.clone()).unwrap()).to_string();
    }
    room.apply_remote_operations(&[moved_echo]).unwrap();

    assert_eq!(room.list_child(&list, 0).unwrap(), Some(child));
}

// ===== CONFLICTS =====

#[test]
fn test_concurrent_key_writes_last_sequenced_wins() {
    let (mut network, _) = network_with_list(2);
    network.room(0).object_set(&NodeId::root(), "k", "first").unwrap();
    network.room(1).object_set(&NodeId::root(), "k", "second").unwrap();

    // Client 0 is sequenced first; client 1 keeps its own value while the
    // earlier write passes by.
    let ops = network.take_outgoing(0);
    network.broadcast(&ops);
    assert_eq!(root_json(&network.clients[1].room)["k"], json!("second"));
    assert_eq!(root_json(&network.clients[0].room)["k"], json!("first"));

    network.sync();
    network.assert_converged();
    assert_eq!(root_json(&network.observer)["k"], json!("second"));
}

#[test]
fn test_concurrent_pushes_converge() {
    let (mut network, list) = network_with_list(3);
    for client in 0..3 {
        for n in 0..3 {
            network
                .room(client)
                .list_push(&list, format!("{client}-{n}"))
                .unwrap();
        }
    }
    network.sync();

    network.assert_converged();
    assert_eq!(network.observer.list_len(&list).unwrap(), 10);
}

#[test]
fn test_concurrent_list_sets_converge() {
    let (mut network, list) = network_with_list(2);
    let recorded = record_updates(network.room(1), &list, SubscribeOptions::default());

    network.room(0).list_set(&list, 0, "x").unwrap();
    network.room(1).list_set(&list, 0, "y").unwrap();
    network.sync();

    network.assert_converged();
    assert_eq!(list_json(&network.observer, &list), json!(["y"]));

    // "x" replaced the pending "y", then the ack put "y" back.
    let recorded = recorded.borrow();
    let restored = recorded.last().unwrap()[0].list_changes().unwrap();
    assert_eq!(restored.len(), 1);
    assert!(matches!(restored[0], ListChange::Set { index: 0, .. }));
}

#[test]
fn test_concurrent_list_sets_restore_nested_items() {
    let (mut network, list) = network_with_list(2);

    network.room(0).list_set(&list, 0, "x").unwrap();
    network
        .room(1)
        .list_set(&list, 0, LiveValue::object([("tags", LiveValue::list(["t"]))]))
        .unwrap();
    network.sync();

    network.assert_converged();
    assert_eq!(
        list_json(&network.observer, &list),
        json!([{"tags": ["t"]}])
    );
}

#[test]
fn test_list_set_sequenced_last_wins() {
    let (mut network, list) = network_with_list(3);
    for (client, value) in ["a", "b", "c"].into_iter().enumerate() {
        network.room(client).list_set(&list, 0, value).unwrap();
    }
    network.sync();

    network.assert_converged();
    assert_eq!(list_json(&network.observer, &list), json!(["c"]));
}

#[test]
fn test_concurrent_moves_and_deletes_converge() {
    let (mut network, list) = network_with_list(2);
    for value in ["a", "b", "c"] {
        network.room(0).list_push(&list, value).unwrap();
    }
    network.sync();

    network.room(0).list_move(&list, 0, 3).unwrap();
    network.room(1).list_delete(&list, 0).unwrap();
    network.room(1).list_move(&list, 2, 0).unwrap();
    network.sync();

    network.assert_converged();
}

#[test]
fn test_delete_wins_over_writes_inside_deleted_node() {
    let (mut network, _) = network_with_list(2);
    let doc = network.room(0).child(&NodeId::root(), "doc").unwrap().unwrap();

    network.room(0).object_delete(&NodeId::root(), "doc").unwrap();
    network.room(1).object_set(&doc, "v", 1).unwrap();
    network
        .room(1)
        .object_set(&doc, "nested", LiveValue::list(["x"]))
        .unwrap();
    network.sync();

    network.assert_converged();
    for client in &network.clients {
        assert!(!client.room.contains(&doc));
    }
    assert_eq!(root_json(&network.observer).get("doc"), None);
}

#[test]
fn test_offline_session_adopts_connection_id() {
    let mut room = Room::new(RoomConfig::default());
    assert!(room.id_prefix().starts_with("local-"));
    let offline = room.object_set(&NodeId::root(), "a", LiveValue::list(["x"])).unwrap().unwrap();
    assert!(offline.as_str().starts_with("local-"));

    room.set_connection_id(7);
    let online = room.object_set(&NodeId::root(), "b", LiveValue::list(["y"])).unwrap().unwrap();
    assert!(online.as_str().starts_with("7:"));
    assert_eq!(root_json(&room), json!({"a": ["x"], "b": ["y"]}));
}

// ===== ORDER INDEPENDENCE =====

/// Collects the ops of several clients editing offline.
fn offline_ops(network: &mut Network, list: &NodeId) -> Vec<Op> {
    let seed = network.room(0).list_child(list, 0).unwrap().unwrap();
    for client in 0..3 {
        let room = network.room(client);
        for n in 0..4 {
            let index = (n * 7 + client) % (room.list_len(list).unwrap() + 1);
            room.list_insert(list, index, format!("{client}-{n}")).unwrap();
        }
        room.object_set(&NodeId::root(), format!("by-{client}"), client as i64)
            .unwrap();
    }
    let room = network.room(2);
    let index = room
        .children_of(list)
        .unwrap()
        .iter()
        .position(|id| id == &seed)
        .unwrap();
    room.list_delete(list, index).unwrap();
    network.room(1).object_delete(&NodeId::root(), "doc").unwrap();

    (0..3).flat_map(|client| network.take_outgoing(client)).collect()
}

#[test]
fn test_delivery_order_does_not_matter() {
    let (mut network, list) = network_with_list(3);
    let ops = offline_ops(&mut network, &list);
    let snapshot = network.observer.get_full_state_snapshot().unwrap();

    let mut expected = None;
    for seed in 0..20 {
        let mut shuffled = ops.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut replica = Room::from_snapshot(RoomConfig::default().with_connection_id(500), snapshot.clone()).unwrap();
        for op in &shuffled {
            replica.apply_remote_operations(std::slice::from_ref(op)).unwrap();
        }
        let state = root_json(&replica);
        match &expected {
            None => expected = Some(state),
            Some(expected) => assert_eq!(&state, expected, "seed {seed} diverged"),
        }
    }
}

#[test]
fn test_sequenced_delivery_converges_with_pending_state() {
    let (mut network, list) = network_with_list(3);
    let ops = offline_ops(&mut network, &list);

    // Every client also holds its own unacked edits while the log streams in.
    network.broadcast(&ops);

    network.assert_converged();
}

// ===== IDEMPOTENCE =====

#[test]
fn test_repeated_delete_is_idempotent() {
    let (mut network, list) = network_with_list(1);
    let seed = network.room(0).list_child(&list, 0).unwrap().unwrap();
    let delete = Op::delete(seed);

    network.broadcast(std::slice::from_ref(&delete));
    let once = root_json(&network.observer);
    network.broadcast(&[delete.clone(), delete]);

    assert_eq!(root_json(&network.observer), once);
    network.assert_converged();
}

#[test]
fn test_repeated_set_create_is_idempotent() {
    let (mut network, list) = network_with_list(1);
    let seed = network.room(0).list_child(&list, 0).unwrap().unwrap();
    let position = network.room(0).parent_of(&seed).unwrap().unwrap().key;
    let set = Op::Create(CreateOp {
        op_id: None,
        id: NodeId::new("77:0"),
        parent_id: list.clone(),
        parent_key: position,
        kind: CreateKind::Register(json!("replaced")),
        intent: Some(Intent::Set),
        deleted_id: Some(seed),
    });

    network.broadcast(std::slice::from_ref(&set));
    let once = root_json(&network.observer);
    network.broadcast(&[set.clone(), set]);

    assert_eq!(root_json(&network.observer), once);
    assert_eq!(list_json(&network.observer, &list), json!(["replaced"]));
    network.assert_converged();
}
