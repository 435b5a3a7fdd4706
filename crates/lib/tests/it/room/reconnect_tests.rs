//! Resynchronization after a lost connection.

use canopy::{LiveValue, NodeId, room::SubscribeOptions};
use serde_json::json;

use crate::helpers::*;

fn network_with_list(clients: usize) -> (Network, NodeId) {
    let mut network = Network::with_setup(clients, |room| {
        room.object_set(&NodeId::root(), "items", LiveValue::list(["seed"]))
            .unwrap();
    });
    let list = network.room(0).child(&NodeId::root(), "items").unwrap().unwrap();
    (network, list)
}

#[test]
fn test_offline_edits_replay_on_top_of_server_state() {
    let (mut network, list) = network_with_list(2);
    network.disconnect(0);

    network.room(0).list_push(&list, "mine").unwrap();
    network.room(0).object_set(&NodeId::root(), "note", "offline").unwrap();
    network.room(1).list_push(&list, "theirs").unwrap();
    network.room(1).object_set(&NodeId::root(), "title", "shared").unwrap();
    network.sync();
    assert_eq!(root_json(&network.observer).get("note"), None);

    network.reconnect(0);
    // Local view already shows both sides before the replay is acked.
    let local = root_json(&network.clients[0].room);
    assert_eq!(local["note"], json!("offline"));
    assert_eq!(local["title"], json!("shared"));
    assert_eq!(network.clients[0].room.pending().len(), 2);

    network.sync();
    network.assert_converged();
    assert_eq!(network.observer.list_len(&list).unwrap(), 3);
}

#[test]
fn test_ops_the_server_already_has_are_not_replayed() {
    let (mut network, list) = network_with_list(2);
    network.room(0).list_push(&list, "a").unwrap();

    // The server sequences the push, but the echo never reaches client 0.
    let ops = network.take_outgoing(0);
    network.disconnect(0);
    network.broadcast(&ops);

    network.reconnect(0);
    assert!(network.clients[0].room.pending().is_empty());
    network.sync();
    network.assert_converged();
    assert_eq!(list_json(&network.observer, &list), json!(["seed", "a"]));
}

#[test]
fn test_server_state_overrides_stale_local_state() {
    let (mut network, list) = network_with_list(2);
    let seed = network.room(0).list_child(&list, 0).unwrap().unwrap();
    network.disconnect(0);

    network.room(1).list_delete(&list, 0).unwrap();
    network.room(1).object_set(&NodeId::root(), "items", 5).unwrap();
    network.sync();

    let recorded = record_updates(network.room(0), &NodeId::root(), SubscribeOptions::deep());
    network.reconnect(0);

    assert!(!network.clients[0].room.contains(&seed));
    assert!(!network.clients[0].room.contains(&list));
    assert_eq!(root_json(&network.clients[0].room), json!({"items": 5}));
    assert_eq!(recorded.borrow().len(), 1);
    network.assert_converged();
}

#[test]
fn test_pending_ops_into_deleted_nodes_are_dropped() {
    let (mut network, list) = network_with_list(2);
    network.disconnect(0);

    network.room(0).list_push(&list, "lost").unwrap();
    network.room(1).object_delete(&NodeId::root(), "items").unwrap();
    network.sync();

    network.reconnect(0);
    assert!(network.clients[0].room.pending().is_empty());
    network.sync();
    network.assert_converged();
    assert_eq!(root_json(&network.observer), json!({}));
}

#[test]
fn test_replayed_moves_keep_their_intent() {
    let (mut network, list) = network_with_list(2);
    for value in ["a", "b"] {
        network.room(1).list_push(&list, value).unwrap();
    }
    network.sync();
    network.disconnect(0);

    // ["seed", "a", "b"]: client 0 moves "seed" last, client 1 adds "c".
    network.room(0).list_move(&list, 0, 2).unwrap();
    network.room(1).list_push(&list, "c").unwrap();
    network.sync();

    network.reconnect(0);
    network.sync();
    network.assert_converged();
    // "seed" and "c" both landed after "b"; their relative order depends on
    // the position seeds, but the move survived the resync.
    let items = list_json(&network.observer, &list);
    assert_eq!(items.as_array().unwrap().len(), 4);
    assert_eq!(items[0], json!("a"));
    assert_eq!(items[1], json!("b"));
}
