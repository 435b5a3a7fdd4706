//! End-to-end scenarios for the core list and map behaviors.

use canopy::{
    LiveValue, NodeId,
    crdt::ListChange,
    op::{CreateKind, CreateOp, Intent, Op},
    room::SubscribeOptions,
};
use serde_json::json;

use crate::helpers::*;

#[test]
fn test_push_appends_in_order() {
    let (mut room, list) = room_with_list(1);

    room.list_push(&list, "a").unwrap();
    room.list_push(&list, "b").unwrap();

    assert_eq!(root_json(&room), json!({"items": ["a", "b"]}));
}

#[test]
fn test_move_first_to_last() {
    let mut room = test_room(1);
    let list = room
        .object_set(&NodeId::root(), "items", LiveValue::list(["A", "B", "C"]))
        .unwrap()
        .unwrap();

    room.list_move(&list, 0, 2).unwrap();

    assert_eq!(list_json(&room, &list), json!(["B", "C", "A"]));
}

#[test]
fn test_remote_set_over_pending_push_does_not_duplicate() {
    let (mut room, list) = room_with_list(1);
    room.list_push(&list, "B").unwrap();
    let pushed = room.pending().iter().last().unwrap().op.clone();
    let position = pushed.as_create().unwrap().parent_key.clone();

    let recorded = record_updates(&mut room, &list, SubscribeOptions::default());
    let remote = Op::Create(CreateOp {
        op_id: None,
        id: NodeId::new("2:0"),
        parent_id: list.clone(),
        parent_key: position,
        kind: CreateKind::Register(json!("B")),
        intent: Some(Intent::Set),
        deleted_id: None,
    });
    room.apply_remote_operations(&[remote]).unwrap();

    assert_eq!(list_json(&room, &list), json!(["B"]));
    {
        let recorded = recorded.borrow();
        assert_eq!(recorded.len(), 1);
        let changes = recorded[0][0].list_changes().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], ListChange::Set { index: 0, .. }));
    }

    // The late ack for the replaced push changes nothing.
    room.apply_remote_operations(&[pushed]).unwrap();
    assert_eq!(list_json(&room, &list), json!(["B"]));
    assert_eq!(recorded.borrow().len(), 1);
}

#[test]
fn test_batched_map_writes_notify_once() {
    let mut room = test_room(1);
    let map = room
        .object_set(
            &NodeId::root(),
            "map",
            LiveValue::map(Vec::<(String, LiveValue)>::new()),
        )
        .unwrap()
        .unwrap();
    let recorded = record_updates(&mut room, &NodeId::root(), SubscribeOptions::deep());

    room.batch(|room| {
        room.map_set(&map, "key", "a")?;
        room.map_set(&map, "key", "b")?;
        Ok(())
    })
    .unwrap();

    assert_eq!(recorded.borrow().len(), 1);
    assert_eq!(room.get(&map, "key").unwrap().unwrap(), json!("b"));

    // One batch, one history entry.
    room.undo().unwrap();
    assert_eq!(root_json(&room), json!({"map": {}}));
    assert!(room.can_undo());
}
