//! Map semantics: string keys to child nodes, last writer wins per key.

use super::{
    ApplyResult, KeyChange, OpSource, Pool, StorageUpdate,
    node::{Node, ParentLink},
};
use crate::{
    Result,
    op::{CreateOp, Op},
};

impl Pool {
    pub(crate) fn attach_to_map(&mut self, op: &CreateOp, source: OpSource) -> Result<ApplyResult> {
        let key = op.parent_key.as_str();
        if !self.claim_key(&op.parent_id, key, op.op_id.as_ref(), source) {
            return Ok(ApplyResult::Unmodified);
        }

        let previous = self.map(&op.parent_id)?.entries.get(key).cloned();
        let reverse = match &previous {
            Some(child) => self.subtree_ops(child)?,
            None => vec![Op::delete(op.id.clone())],
        };
        if let Some(child) = previous {
            self.map_mut(&op.parent_id)?.entries.remove(key);
            self.remove_subtree(&child);
        }

        self.insert_node(
            Node::from_create(op.id.clone(), &op.kind),
            ParentLink {
                id: op.parent_id.clone(),
                key: key.to_string(),
            },
        );
        self.map_mut(&op.parent_id)?
            .entries
            .insert(key.to_string(), op.id.clone());
        self.invalidate(&op.parent_id);

        let update = StorageUpdate::map(
            op.parent_id.clone(),
            self.path(&op.parent_id),
            key,
            KeyChange::Updated,
        );
        Ok(ApplyResult::modified(update, reverse))
    }
}
