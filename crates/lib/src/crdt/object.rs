//! Object semantics: last writer wins per key.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as Json};
use tracing::{trace, warn};

use super::{
    ApplyResult, KeyChange, NodeId, NodeKind, OpId, OpSource, Pool, StorageUpdate, UpdateKind,
    node::{Node, ParentLink, Prop},
};
use crate::{
    Result,
    op::{CreateOp, Op},
};

impl Pool {
    /// Attaches a created node under an object key, replacing what was there.
    pub(crate) fn attach_to_object(&mut self, op: &CreateOp, source: OpSource) -> Result<ApplyResult> {
        let key = op.parent_key.as_str();
        if !self.claim_key(&op.parent_id, key, op.op_id.as_ref(), source) {
            return Ok(ApplyResult::Unmodified);
        }

        let reverse = self.object_key_reverse(&op.parent_id, key)?;
        self.take_object_key(&op.parent_id, key)?;
        self.insert_node(
            Node::from_create(op.id.clone(), &op.kind),
            ParentLink {
                id: op.parent_id.clone(),
                key: key.to_string(),
            },
        );
        self.object_mut(&op.parent_id)?
            .props
            .insert(key.to_string(), Prop::Node(op.id.clone()));
        self.invalidate(&op.parent_id);

        let update = StorageUpdate::object(
            op.parent_id.clone(),
            self.path(&op.parent_id),
            key,
            KeyChange::Updated,
        );
        Ok(ApplyResult::modified(update, reverse))
    }

    pub(crate) fn apply_update_object(
        &mut self,
        id: &NodeId,
        data: &JsonMap<String, Json>,
        op_id: Option<&OpId>,
        source: OpSource,
    ) -> Result<ApplyResult> {
        if !self.is_object(id) {
            return Ok(ApplyResult::Unmodified);
        }

        let mut keys = BTreeMap::new();
        let mut previous = JsonMap::new();
        let mut reverse = Vec::new();
        for (key, value) in data {
            if !self.claim_key(id, key, op_id, source) {
                continue;
            }
            match self.object(id)?.props.get(key) {
                Some(Prop::Value(old)) => {
                    previous.insert(key.clone(), old.clone());
                }
                Some(Prop::Node(_)) | None => reverse.extend(self.object_key_reverse(id, key)?),
            }
            self.take_object_key(id, key)?;
            self.object_mut(id)?
                .props
                .insert(key.clone(), Prop::Value(value.clone()));
            keys.insert(key.clone(), KeyChange::Updated);
        }

        if keys.is_empty() {
            return Ok(ApplyResult::Unmodified);
        }
        if !previous.is_empty() {
            reverse.insert(
                0,
                Op::UpdateObject {
                    op_id: None,
                    id: id.clone(),
                    data: previous,
                },
            );
        }
        self.invalidate(id);
        trace!(node = %id, keys = keys.len(), "Updated object");

        let update = StorageUpdate {
            node: id.clone(),
            kind: UpdateKind::Object(keys),
            path: self.path(id),
        };
        Ok(ApplyResult::modified(update, reverse))
    }

    pub(crate) fn apply_delete_object_key(
        &mut self,
        id: &NodeId,
        key: &str,
        op_id: Option<&OpId>,
        source: OpSource,
    ) -> Result<ApplyResult> {
        if !self.is_object(id) || !self.object(id)?.props.contains_key(key) {
            return Ok(ApplyResult::Unmodified);
        }
        if !self.claim_key(id, key, op_id, source) {
            return Ok(ApplyResult::Unmodified);
        }

        let reverse = self.object_key_reverse(id, key)?;
        self.take_object_key(id, key)?;
        self.invalidate(id);

        let update = StorageUpdate::object(id.clone(), self.path(id), key, KeyChange::Deleted);
        Ok(ApplyResult::modified(update, reverse))
    }

    fn is_object(&self, id: &NodeId) -> bool {
        match self.get(id).map(Node::kind) {
            Some(NodeKind::Object) => true,
            Some(kind) => {
                warn!(node = %id, kind = kind.name(), "Object op targets a non-object, ignoring");
                false
            }
            None => {
                warn!(node = %id, "Object op targets an unknown node, ignoring");
                false
            }
        }
    }

    /// Ops restoring `key` of an object to its current content.
    fn object_key_reverse(&self, id: &NodeId, key: &str) -> Result<Vec<Op>> {
        Ok(match self.object(id)?.props.get(key) {
            Some(Prop::Value(value)) => vec![Op::UpdateObject {
                op_id: None,
                id: id.clone(),
                data: JsonMap::from_iter([(key.to_string(), value.clone())]),
            }],
            Some(Prop::Node(child)) => self.subtree_ops(child)?,
            None => vec![Op::DeleteObjectKey {
                op_id: None,
                id: id.clone(),
                key: key.to_string(),
            }],
        })
    }

    /// Removes a property, dropping the child subtree if it held a node.
    fn take_object_key(&mut self, id: &NodeId, key: &str) -> Result<Option<Prop>> {
        let previous = self.object_mut(id)?.props.remove(key);
        if let Some(Prop::Node(child)) = &previous {
            self.remove_subtree(child);
        }
        Ok(previous)
    }
}
