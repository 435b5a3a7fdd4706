//! Applying ops to the pool.
//!
//! Every op is applied the same way whether it was issued locally, delivered
//! from the server, or replayed from history; the [`OpSource`] only decides
//! key ownership. Ops referencing nodes that no longer exist are dropped.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::{
    ApplyResult, KeyChange, ListChange, NodeId, NodeKind, OpId, OpSource, Pool, StorageError,
    StorageUpdate,
    node::{NodeBody, Prop},
};
use crate::{
    Result,
    op::{CreateOp, Op},
};

impl Pool {
    /// Applies one op and reports what changed along with the ops that
    /// would undo it.
    pub fn apply(&mut self, op: &Op, source: OpSource) -> Result<ApplyResult> {
        match op {
            Op::Create(create) => self.apply_create(create, source),
            Op::Delete { id, .. } => self.apply_delete(id),
            Op::SetParentKey { id, parent_key, .. } => self.move_list_child(id, parent_key),
            Op::UpdateObject { op_id, id, data } => {
                self.apply_update_object(id, data, op_id.as_ref(), source)
            }
            Op::DeleteObjectKey { op_id, id, key } => {
                self.apply_delete_object_key(id, key, op_id.as_ref(), source)
            }
        }
    }

    fn apply_create(&mut self, op: &CreateOp, source: OpSource) -> Result<ApplyResult> {
        if self.contains(&op.id) {
            trace!(node = %op.id, "Node already exists, ignoring create");
            return Ok(ApplyResult::Unmodified);
        }
        let Some(parent) = self.get(&op.parent_id) else {
            warn!(node = %op.id, parent = %op.parent_id, "Create references an unknown parent, ignoring");
            return Ok(ApplyResult::Unmodified);
        };
        let result = match parent.kind() {
            NodeKind::Object => self.attach_to_object(op, source)?,
            NodeKind::List => self.attach_to_list(op, source)?,
            NodeKind::Map => self.attach_to_map(op, source)?,
            NodeKind::Register => {
                warn!(node = %op.id, parent = %op.parent_id, "Registers cannot hold children, ignoring create");
                ApplyResult::Unmodified
            }
        };
        if source == OpSource::Local && result.is_modified() {
            self.track_unacked_create(op);
        }
        Ok(result)
    }

    /// Detaches a node from its container and drops its subtree.
    pub(crate) fn apply_delete(&mut self, id: &NodeId) -> Result<ApplyResult> {
        let Some(node) = self.get(id) else {
            debug!(node = %id, "Delete of unknown node ignored");
            return Ok(ApplyResult::Unmodified);
        };
        let Some(link) = node.parent.clone() else {
            warn!(node = %id, "The root cannot be deleted");
            return Ok(ApplyResult::Unmodified);
        };

        let reverse = self.subtree_ops(id)?;
        let path = self.path(&link.id);
        let update = match self.node(&link.id)?.kind() {
            NodeKind::Object => {
                let object = self.object_mut(&link.id)?;
                if object.props.get(&link.key) == Some(&Prop::Node(id.clone())) {
                    object.props.remove(&link.key);
                }
                StorageUpdate::object(link.id.clone(), path, &link.key, KeyChange::Deleted)
            }
            NodeKind::Map => {
                let map = self.map_mut(&link.id)?;
                if map.entries.get(&link.key) == Some(id) {
                    map.entries.remove(&link.key);
                }
                StorageUpdate::map(link.id.clone(), path, &link.key, KeyChange::Deleted)
            }
            NodeKind::List => {
                let deleted = self.to_immutable(id)?;
                let list = self.list_mut(&link.id)?;
                let index = list.index_of(id).ok_or_else(|| StorageError::Structural {
                    reason: format!("node {id} is missing from its list {}", link.id),
                })?;
                list.remove(index);
                StorageUpdate::list(
                    link.id.clone(),
                    path,
                    vec![ListChange::Delete { index, deleted }],
                )
            }
            NodeKind::Register => {
                return Err(StorageError::Structural {
                    reason: format!("node {id} is attached to register {}", link.id),
                }
                .into());
            }
        };

        self.invalidate(&link.id);
        let removed = self.remove_subtree(id);
        trace!(node = %id, removed, "Deleted subtree");
        Ok(ApplyResult::modified(update, reverse))
    }

    /// Reconciles the server's echo of one of our own ops.
    ///
    /// Releases key ownership taken by the op and, unless a later local op
    /// still targets the same node (`superseded`), moves list children to the
    /// position the server settled on. A create whose node a remote set
    /// replaced before the ack is applied again, since the server ordered it
    /// after that set.
    pub fn apply_ack(&mut self, op: &Op, superseded: bool) -> Result<ApplyResult> {
        match op {
            Op::Create(create) => {
                if let Some(op_id) = &create.op_id {
                    self.release_key(&create.parent_id, &create.parent_key, op_id);
                }
                if self.untrack_unacked_create(&create.id) && !self.contains(&create.id) {
                    debug!(node = %create.id, "Restoring pending node replaced by a remote set");
                    let mut result = self.apply_create(create, OpSource::Remote)?;
                    if let ApplyResult::Modified { reverse, .. } = &mut result {
                        reverse.clear();
                    }
                    return Ok(result);
                }
                if superseded {
                    return Ok(ApplyResult::Unmodified);
                }
                self.settle_list_position(&create.id, &create.parent_id, &create.parent_key)
            }
            Op::SetParentKey { id, parent_key, .. } => {
                let parent_id = match self.get(id).and_then(|n| n.parent.as_ref()) {
                    Some(link) if !superseded => link.id.clone(),
                    _ => return Ok(ApplyResult::Unmodified),
                };
                self.settle_list_position(id, &parent_id, parent_key)
            }
            Op::UpdateObject {
                op_id: Some(op_id),
                id,
                data,
            } => {
                for key in data.keys() {
                    self.release_key(id, key, op_id);
                }
                Ok(ApplyResult::Unmodified)
            }
            Op::DeleteObjectKey {
                op_id: Some(op_id),
                id,
                key,
            } => {
                self.release_key(id, key, op_id);
                Ok(ApplyResult::Unmodified)
            }
            _ => Ok(ApplyResult::Unmodified),
        }
    }

    fn settle_list_position(
        &mut self,
        id: &NodeId,
        parent_id: &NodeId,
        parent_key: &str,
    ) -> Result<ApplyResult> {
        let Some(link) = self.get(id).and_then(|n| n.parent.clone()) else {
            return Ok(ApplyResult::Unmodified);
        };
        if &link.id != parent_id || link.key == parent_key {
            return Ok(ApplyResult::Unmodified);
        }
        if self.node(&link.id)?.kind() != NodeKind::List {
            return Ok(ApplyResult::Unmodified);
        }
        debug!(
            node = %id,
            local = %link.key,
            server = %parent_key,
            "Server settled a different list position, moving"
        );
        let mut result = self.move_list_child(id, parent_key)?;
        if let ApplyResult::Modified { reverse, .. } = &mut result {
            reverse.clear();
        }
        Ok(result)
    }

    fn unacked_mut(&mut self, container: &NodeId) -> Option<&mut HashMap<String, OpId>> {
        match self.nodes.get_mut(container).map(|n| &mut n.body) {
            Some(NodeBody::Object(object)) => Some(&mut object.unacked),
            Some(NodeBody::Map(map)) => Some(&mut map.unacked),
            _ => None,
        }
    }

    /// Decides whether a write to `key` of an object or map goes ahead.
    ///
    /// Local writes take ownership of the key until acknowledged; remote
    /// writes to an owned key are skipped, since the server will deliver our
    /// pending write after them.
    pub(crate) fn claim_key(
        &mut self,
        container: &NodeId,
        key: &str,
        op_id: Option<&OpId>,
        source: OpSource,
    ) -> bool {
        let Some(unacked) = self.unacked_mut(container) else {
            return true;
        };
        match source {
            OpSource::Remote => {
                let owned = unacked.contains_key(key);
                if owned {
                    trace!(container = %container, key, "Key has unacknowledged local writes, skipping remote write");
                }
                !owned
            }
            OpSource::Local => {
                if let Some(op_id) = op_id {
                    unacked.insert(key.to_string(), op_id.clone());
                }
                true
            }
        }
    }

    fn release_key(&mut self, container: &NodeId, key: &str, op_id: &OpId) {
        if let Some(unacked) = self.unacked_mut(container)
            && unacked.get(key) == Some(op_id)
        {
            unacked.remove(key);
        }
    }
}
