//! Local ops awaiting acknowledgment from the server.

use std::collections::HashMap;

use crate::{
    crdt::{NodeId, OpId},
    op::Op,
};

/// A locally applied op that the server has not echoed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOp {
    pub op: Op,
}

impl PendingOp {
    pub fn op_id(&self) -> Option<&OpId> {
        self.op.op_id()
    }
}

/// Pending ops in send order, indexed by op id.
#[derive(Debug, Default)]
pub struct PendingOps {
    ops: Vec<PendingOp>,
    index: HashMap<OpId, usize>,
}

impl PendingOps {
    pub(crate) fn push(&mut self, op: Op) {
        if let Some(op_id) = op.op_id() {
            self.index.insert(op_id.clone(), self.ops.len());
        }
        self.ops.push(PendingOp { op });
    }

    pub fn contains(&self, op_id: &OpId) -> bool {
        self.index.contains_key(op_id)
    }

    /// Removes the op with `op_id`, keeping the order of the rest.
    pub(crate) fn remove(&mut self, op_id: &OpId) -> Option<PendingOp> {
        let position = self.index.remove(op_id)?;
        let removed = self.ops.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// True if a pending op creates or moves `id`.
    pub fn places(&self, id: &NodeId) -> bool {
        self.ops.iter().any(|pending| match &pending.op {
            Op::Create(create) => &create.id == id,
            Op::SetParentKey { id: target, .. } => target == id,
            _ => false,
        })
    }

    pub(crate) fn take_all(&mut self) -> Vec<PendingOp> {
        self.index.clear();
        std::mem::take(&mut self.ops)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
