//! Reconciling with a fresh server snapshot after a reconnect.

use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value as Json};
use tracing::{debug, info, trace};

use super::Room;
use crate::{
    Result,
    crdt::{ApplyResult, NodeId, NodeKind, OpSource},
    op::{CreateKind, CreateOp, Op, SerializedNode, StorageItem},
};

impl Room {
    /// Brings local storage in line with `items`, the server's state after a
    /// reconnect, then replays every pending op the server never received.
    ///
    /// The server state is applied as remote ops, so subscribers see the
    /// difference as ordinary updates. Replayed ops stay pending and are
    /// sent again.
    pub fn reconnect_with_snapshot(&mut self, items: Vec<StorageItem>) -> Result<()> {
        let pending = self.pending.take_all();
        info!(
            nodes = items.len(),
            pending = pending.len(),
            "Resynchronizing with server snapshot"
        );
        self.pool.clear_unacked();

        let incoming: HashMap<NodeId, SerializedNode> = items.iter().cloned().collect();
        let current = self.pool.serialize()?;

        // Nodes the server lacks, or that changed identity in a way only a
        // fresh create can express.
        for (id, ours) in &current {
            if id.is_root() {
                continue;
            }
            let keep = incoming
                .get(id)
                .is_some_and(|theirs| self.is_same_node(ours, theirs));
            if !keep {
                self.apply_resync(&Op::delete(id.clone()))?;
            }
        }

        // Plain object keys the server dropped.
        for (id, ours) in &current {
            if ours.kind != NodeKind::Object || !self.pool.contains(id) {
                continue;
            }
            let theirs = incoming
                .get(id)
                .map(SerializedNode::object_data)
                .unwrap_or_default();
            for key in ours.object_data().keys() {
                if !theirs.contains_key(key) {
                    self.apply_resync(&Op::DeleteObjectKey {
                        op_id: None,
                        id: id.clone(),
                        key: key.clone(),
                    })?;
                }
            }
        }

        // Everything else, parents before children.
        for (id, theirs) in &items {
            let Some(node) = self.pool.get(id) else {
                if let Some(op) = create_from_snapshot(id, theirs) {
                    self.apply_resync(&op)?;
                }
                continue;
            };

            let moved = match (node.parent(), &theirs.parent_key) {
                (Some(link), Some(key)) if &link.key != key => Some(key.clone()),
                _ => None,
            };
            if theirs.kind == NodeKind::Object {
                let ours = node.serialize()?.object_data();
                let changed: JsonMap<String, Json> = theirs
                    .object_data()
                    .into_iter()
                    .filter(|(key, value)| ours.get(key) != Some(value))
                    .collect();
                if !changed.is_empty() {
                    self.apply_resync(&Op::UpdateObject {
                        op_id: None,
                        id: id.clone(),
                        data: changed,
                    })?;
                }
            }
            if let Some(key) = moved {
                self.apply_resync(&Op::set_parent_key(id.clone(), key))?;
            }
        }

        let mut replayed = 0;
        for entry in pending {
            if is_reflected(&entry.op, &incoming) {
                trace!(op = entry.op.op_code().name(), node = %entry.op.id(), "Pending op already applied by the server");
                continue;
            }
            let mut op = entry.op;
            self.relocate(&mut op);
            match self.pool.apply(&op, OpSource::Local)? {
                ApplyResult::Modified { updates, .. } => {
                    self.frame.updates.extend(updates);
                    self.pending.push(op.clone());
                    self.frame.outgoing.push(op);
                    replayed += 1;
                }
                ApplyResult::Unmodified => {
                    debug!(op = op.op_code().name(), node = %op.id(), "Pending op no longer applies, dropping");
                }
            }
        }
        debug!(replayed, "Resync complete");
        self.end_operation()
    }

    /// Whether a local node can stay in place for its server counterpart.
    fn is_same_node(&self, ours: &SerializedNode, theirs: &SerializedNode) -> bool {
        if ours.kind != theirs.kind || ours.parent_id != theirs.parent_id {
            return false;
        }
        if ours.kind == NodeKind::Register && ours.data != theirs.data {
            return false;
        }
        // Only list children can change key in place.
        let parent_is_list = ours
            .parent_id
            .as_ref()
            .and_then(|parent| self.pool.get(parent))
            .is_some_and(|parent| parent.kind() == NodeKind::List);
        parent_is_list || ours.parent_key == theirs.parent_key
    }

    fn apply_resync(&mut self, op: &Op) -> Result<()> {
        if let ApplyResult::Modified { updates, .. } = self.pool.apply(op, OpSource::Remote)? {
            self.frame.updates.extend(updates);
        }
        Ok(())
    }
}

fn create_from_snapshot(id: &NodeId, node: &SerializedNode) -> Option<Op> {
    let (parent_id, parent_key) = node.parent()?;
    let kind = match node.kind {
        NodeKind::Object => CreateKind::Object(node.object_data()),
        NodeKind::List => CreateKind::List,
        NodeKind::Map => CreateKind::Map,
        NodeKind::Register => CreateKind::Register(node.data.clone().unwrap_or(Json::Null)),
    };
    Some(Op::Create(CreateOp {
        op_id: None,
        id: id.clone(),
        parent_id: parent_id.clone(),
        parent_key: parent_key.to_string(),
        kind,
        intent: None,
        deleted_id: None,
    }))
}

/// True if the server state already contains the effect of `op`, or the
/// node it targets is gone.
fn is_reflected(op: &Op, incoming: &HashMap<NodeId, SerializedNode>) -> bool {
    match op {
        Op::Create(create) => incoming.contains_key(&create.id),
        Op::Delete { id, .. } => !incoming.contains_key(id),
        Op::SetParentKey { id, parent_key, .. } => incoming
            .get(id)
            .is_none_or(|node| node.parent_key.as_deref() == Some(parent_key.as_str())),
        Op::UpdateObject { id, data, .. } => incoming.get(id).is_none_or(|node| {
            let theirs = node.object_data();
            data.iter().all(|(key, value)| theirs.get(key) == Some(value))
        }),
        Op::DeleteObjectKey { id, key, .. } => incoming.get(id).is_none_or(|node| {
            !node.object_data().contains_key(key)
                && !incoming.values().any(|child| {
                    child.parent_id.as_ref() == Some(id)
                        && child.parent_key.as_deref() == Some(key.as_str())
                })
        }),
    }
}
