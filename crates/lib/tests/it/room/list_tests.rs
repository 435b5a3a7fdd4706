//! List mutation tests: inserts, moves, sets, deletes and index validation.

use canopy::{LiveValue, NodeId, crdt::ListChange, position::Position, room::SubscribeOptions};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

use crate::helpers::*;

// ===== INSERTION =====

#[test]
fn test_insert_at_index() {
    let (mut room, list) = room_with_list(1);
    room.list_push(&list, "a").unwrap();
    room.list_push(&list, "c").unwrap();

    room.list_insert(&list, 1, "b").unwrap();
    room.list_insert(&list, 0, "start").unwrap();
    room.list_insert(&list, 4, "end").unwrap();

    assert_eq!(
        list_json(&room, &list),
        json!(["start", "a", "b", "c", "end"])
    );
    assert_eq!(room.list_len(&list).unwrap(), 5);
    assert_eq!(room.list_get(&list, 2).unwrap().unwrap(), json!("b"));
    assert!(room.list_get(&list, 5).unwrap().is_none());
}

#[test]
fn test_inserted_position_sorts_between_neighbors() {
    let (mut room, list) = room_with_list(1);
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..200 {
        let len = room.list_len(&list).unwrap();
        let index = rng.gen_range(0..=len);
        let child = room.list_insert(&list, index, round as i64).unwrap();

        let key = |id: &NodeId| Position::parse(room.parent_of(id).unwrap().unwrap().key).unwrap();
        let position = key(&child);
        if index > 0 {
            let before = room.list_child(&list, index - 1).unwrap().unwrap();
            assert!(key(&before) < position, "round {round}: not after left neighbor");
        }
        if let Some(after) = room.list_child(&list, index + 1).unwrap() {
            assert!(position < key(&after), "round {round}: not before right neighbor");
        }
        assert_eq!(room.list_child(&list, index).unwrap(), Some(child));
    }
}

#[test]
fn test_nested_containers_in_list() {
    let (mut room, list) = room_with_list(1);
    let todo = room
        .list_push(
            &list,
            LiveValue::object([
                ("title", LiveValue::from("write tests")),
                ("tags", LiveValue::list(["a", "b"])),
            ]),
        )
        .unwrap();

    assert_eq!(
        list_json(&room, &list),
        json!([{"title": "write tests", "tags": ["a", "b"]}])
    );
    let tags = room.child(&todo, "tags").unwrap().unwrap();
    room.list_push(&tags, "c").unwrap();
    assert_eq!(list_json(&room, &tags), json!(["a", "b", "c"]));
}

// ===== MOVES =====

#[test]
fn test_move_in_both_directions() {
    let mut room = test_room(1);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["a", "b", "c", "d"]))
        .unwrap()
        .unwrap();

    room.list_move(&list, 3, 1).unwrap();
    assert_eq!(list_json(&room, &list), json!(["a", "d", "b", "c"]));

    room.list_move(&list, 0, 3).unwrap();
    assert_eq!(list_json(&room, &list), json!(["d", "b", "c", "a"]));

    room.list_move(&list, 2, 0).unwrap();
    assert_eq!(list_json(&room, &list), json!(["c", "d", "b", "a"]));

    // Moving onto itself is a no-op.
    let pending = room.pending().len();
    room.list_move(&list, 1, 1).unwrap();
    assert_eq!(room.pending().len(), pending);
}

#[test]
fn test_move_keeps_node_identity() {
    let mut room = test_room(1);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["a", "b"]))
        .unwrap()
        .unwrap();
    let first = room.list_child(&list, 0).unwrap().unwrap();
    let recorded = record_updates(&mut room, &list, SubscribeOptions::default());

    room.list_move(&list, 0, 1).unwrap();

    assert_eq!(room.list_child(&list, 1).unwrap(), Some(first));
    let recorded = recorded.borrow();
    let changes = recorded[0][0].list_changes().unwrap();
    assert!(matches!(
        changes,
        [ListChange::Move {
            index: 1,
            previous_index: 0,
            ..
        }]
    ));
}

// ===== SET AND DELETE =====

#[test]
fn test_set_replaces_in_place() {
    let mut room = test_room(1);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["a", "b", "c"]))
        .unwrap()
        .unwrap();
    let old = room.list_child(&list, 1).unwrap().unwrap();
    let recorded = record_updates(&mut room, &list, SubscribeOptions::default());

    let new = room.list_set(&list, 1, "x").unwrap();

    assert_eq!(list_json(&room, &list), json!(["a", "x", "c"]));
    assert!(!room.contains(&old));
    assert_eq!(room.list_child(&list, 1).unwrap(), Some(new));
    let recorded = recorded.borrow();
    assert!(matches!(
        recorded[0][0].list_changes().unwrap(),
        [ListChange::Set { index: 1, .. }]
    ));
}

#[test]
fn test_delete_and_clear() {
    let mut room = test_room(1);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["a", "b", "c"]))
        .unwrap()
        .unwrap();

    room.list_delete(&list, 1).unwrap();
    assert_eq!(list_json(&room, &list), json!(["a", "c"]));

    room.list_clear(&list).unwrap();
    assert_eq!(list_json(&room, &list), json!([]));
    assert_eq!(room.children_of(&list).unwrap(), Vec::<NodeId>::new());
}

// ===== VALIDATION =====

#[test]
fn test_out_of_bounds_indices_are_rejected() {
    let mut room = test_room(1);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["a"]))
        .unwrap()
        .unwrap();
    let before = root_json(&room);
    let pending = room.pending().len();

    assert!(room.list_insert(&list, 2, "x").unwrap_err().is_validation_error());
    assert!(room.list_set(&list, 1, "x").unwrap_err().is_validation_error());
    assert!(room.list_delete(&list, 1).unwrap_err().is_validation_error());
    assert!(room.list_move(&list, 0, 1).unwrap_err().is_validation_error());

    assert_eq!(root_json(&room), before);
    assert_eq!(room.pending().len(), pending);
}

#[test]
fn test_list_ops_on_wrong_kind() {
    let mut room = test_room(1);
    let err = room.list_push(&NodeId::root(), "x").unwrap_err();
    assert!(err.is_validation_error());
    assert!(!err.is_not_found());

    let err = room.list_push(&NodeId::new("9:9"), "x").unwrap_err();
    assert!(err.is_not_found());
}
