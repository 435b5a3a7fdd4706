//! Object and map mutation tests, plus snapshot loading.

use canopy::{
    LiveValue, NodeId, Room, RoomConfig,
    crdt::NodeKind,
};
use serde_json::json;

use crate::helpers::*;

// ===== OBJECTS =====

#[test]
fn test_object_update_mixes_values_and_nodes() {
    let mut room = test_room(1);

    room.object_update(
        &NodeId::root(),
        [
            ("title", LiveValue::from("plan")),
            ("count", LiveValue::from(3)),
            (
                "meta",
                LiveValue::object([("owner", LiveValue::from("ana"))]),
            ),
        ],
    )
    .unwrap();

    assert_eq!(
        root_json(&room),
        json!({"title": "plan", "count": 3, "meta": {"owner": "ana"}})
    );
    assert_eq!(
        room.keys(&NodeId::root()).unwrap(),
        vec!["count", "meta", "title"]
    );
    let meta = room.child(&NodeId::root(), "meta").unwrap().unwrap();
    assert_eq!(room.node_kind(&meta).unwrap(), NodeKind::Object);
    assert!(room.child(&NodeId::root(), "title").unwrap().is_none());
    assert_eq!(
        room.parent_of(&meta).unwrap().map(|link| link.key),
        Some("meta".to_string())
    );
}

#[test]
fn test_object_set_replaces_node_with_value() {
    let mut room = test_room(1);
    let nested = room
        .object_set(&NodeId::root(), "slot", LiveValue::list(["x"]))
        .unwrap()
        .unwrap();

    assert_eq!(room.object_set(&NodeId::root(), "slot", 5).unwrap(), None);

    assert!(!room.contains(&nested));
    assert_eq!(root_json(&room), json!({"slot": 5}));
}

#[test]
fn test_object_delete_reports_presence() {
    let mut room = test_room(1);
    room.object_set(&NodeId::root(), "a", true).unwrap();

    assert!(room.object_delete(&NodeId::root(), "a").unwrap());
    assert!(!room.object_delete(&NodeId::root(), "a").unwrap());
    assert_eq!(root_json(&room), json!({}));
}

// ===== MAPS =====

#[test]
fn test_map_set_get_delete() {
    let mut room = test_room(1);
    let map = room
        .object_set(
            &NodeId::root(),
            "scores",
            LiveValue::map([("ana", 1), ("bo", 2)]),
        )
        .unwrap()
        .unwrap();

    room.map_set(&map, "cy", 3).unwrap();
    room.map_set(&map, "ana", 10).unwrap();
    assert_eq!(
        room.to_immutable(&map).unwrap().to_json(),
        json!({"ana": 10, "bo": 2, "cy": 3})
    );
    assert_eq!(room.keys(&map).unwrap(), vec!["ana", "bo", "cy"]);

    assert!(room.map_delete(&map, "bo").unwrap());
    assert!(!room.map_delete(&map, "bo").unwrap());
    assert_eq!(room.get(&map, "bo").unwrap(), None);
}

#[test]
fn test_map_holds_containers() {
    let mut room = test_room(1);
    let map = room
        .object_set(
            &NodeId::root(),
            "boards",
            LiveValue::map(Vec::<(String, LiveValue)>::new()),
        )
        .unwrap()
        .unwrap();

    let board = room
        .map_set(&map, "main", LiveValue::object([("cards", LiveValue::list([1, 2]))]))
        .unwrap();

    assert_eq!(room.child(&map, "main").unwrap(), Some(board.clone()));
    assert_eq!(
        room.to_immutable(&board).unwrap().to_json(),
        json!({"cards": [1, 2]})
    );
}

// ===== SNAPSHOTS =====

#[test]
fn test_full_state_round_trip() {
    let mut room = test_room(1);
    room.object_set(&NodeId::root(), "title", "doc").unwrap();
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["a", "b"]))
        .unwrap()
        .unwrap();
    room.list_push(&list, LiveValue::map([("k", "v")])).unwrap();

    let json = room.get_full_state_json().unwrap();
    let loaded = Room::from_snapshot_json(RoomConfig::default(), &json).unwrap();

    assert_eq!(root_json(&loaded), root_json(&room));
    assert_eq!(
        loaded.get_full_state_snapshot().unwrap(),
        room.get_full_state_snapshot().unwrap()
    );
    assert!(loaded.id_prefix().starts_with("local-"));
}

#[test]
fn test_snapshot_items_list_parents_first() {
    let mut room = test_room(1);
    room.object_set(
        &NodeId::root(),
        "a",
        LiveValue::object([("b", LiveValue::object([("c", LiveValue::list([1]))]))]),
    )
    .unwrap();

    let items = room.get_full_state_snapshot().unwrap();
    for (index, (_, node)) in items.iter().enumerate() {
        if let Some(parent) = &node.parent_id {
            let parent_index = items.iter().position(|(id, _)| id == parent).unwrap();
            assert!(parent_index < index);
        }
    }
}
