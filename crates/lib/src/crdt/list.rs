//! List semantics: children ordered by fractional position.
//!
//! Two children never share a position. When a create or move lands on an
//! occupied position the occupant is shifted just after it, unless the create
//! carries a set intent, in which case it replaces the occupant.

use tracing::{debug, warn};

use super::{
    ApplyResult, ListChange, NodeId, NodeKind, OpSource, Pool, StorageError, StorageUpdate,
    node::{Node, ParentLink},
};
use crate::{
    Result,
    op::{CreateOp, Intent, Op},
    position::Position,
};

impl Pool {
    pub(crate) fn attach_to_list(&mut self, op: &CreateOp, source: OpSource) -> Result<ApplyResult> {
        let position = match Position::parse(op.parent_key.as_str()) {
            Ok(position) => position,
            Err(err) => {
                warn!(node = %op.id, error = %err, "Create has an invalid list position, ignoring");
                return Ok(ApplyResult::Unmodified);
            }
        };
        let list_id = &op.parent_id;
        let occupant = self.list(list_id)?.occupant(&position).cloned();
        let mut changes = Vec::new();

        let mut reverse = match (op.intent, occupant) {
            (Some(Intent::Set), Some(occupant)) => {
                let mut previous = self.subtree_ops(&occupant)?;
                if let Some(Op::Create(first)) = previous.first_mut() {
                    first.intent = Some(Intent::Set);
                    first.deleted_id = Some(op.id.clone());
                }
                if source == OpSource::Remote {
                    self.note_displaced(&occupant);
                }
                let list = self.list_mut(list_id)?;
                if let Some(index) = list.index_of(&occupant) {
                    list.remove(index);
                }
                self.remove_subtree(&occupant);
                let index = self.insert_list_child(op, position)?;
                changes.push(ListChange::Set {
                    index,
                    item: self.to_immutable(&op.id)?,
                });
                previous
            }
            (_, occupant) => {
                if let Some(occupant) = occupant {
                    changes.push(self.shift_list_child(list_id, &occupant, &position)?);
                }
                let index = self.insert_list_child(op, position)?;
                changes.push(ListChange::Insert {
                    index,
                    item: self.to_immutable(&op.id)?,
                });
                vec![Op::delete(op.id.clone())]
            }
        };

        let mut updates = vec![StorageUpdate::list(
            list_id.clone(),
            self.path(list_id),
            changes,
        )];

        // A set may name a node that has since moved elsewhere.
        if op.intent == Some(Intent::Set)
            && let Some(deleted) = &op.deleted_id
            && deleted != &op.id
            && let ApplyResult::Modified {
                updates: more,
                reverse: undo,
            } = self.apply_delete(deleted)?
        {
            updates.extend(more);
            reverse.extend(undo);
        }

        Ok(ApplyResult::Modified { updates, reverse })
    }

    fn insert_list_child(&mut self, op: &CreateOp, position: Position) -> Result<usize> {
        self.insert_node(
            Node::from_create(op.id.clone(), &op.kind),
            ParentLink {
                id: op.parent_id.clone(),
                key: position.to_string(),
            },
        );
        let index = self.list_mut(&op.parent_id)?.insert(position, op.id.clone());
        self.invalidate(&op.parent_id);
        Ok(index)
    }

    /// Moves `child`, which sits at `from`, to a free position right after it.
    fn shift_list_child(
        &mut self,
        list_id: &NodeId,
        child: &NodeId,
        from: &Position,
    ) -> Result<ListChange> {
        let list = self.list_mut(list_id)?;
        let previous_index = list.index_of(child).ok_or_else(|| StorageError::Structural {
            reason: format!("node {child} is missing from its list {list_id}"),
        })?;
        let shifted = list.position_after(from);
        list.remove(previous_index);
        let index = list.insert(shifted.clone(), child.clone());
        debug!(node = %child, from = %from, to = %shifted, "Shifted list child off a taken position");

        self.set_parent_key(child, shifted.to_string());
        self.invalidate(list_id);
        Ok(ListChange::Move {
            index,
            previous_index,
            item: self.to_immutable(child)?,
        })
    }

    /// Moves a list child to `parent_key`.
    pub(crate) fn move_list_child(&mut self, id: &NodeId, parent_key: &str) -> Result<ApplyResult> {
        let Some(link) = self.get(id).and_then(|n| n.parent.clone()) else {
            warn!(node = %id, "Move of unknown node ignored");
            return Ok(ApplyResult::Unmodified);
        };
        if self.node(&link.id)?.kind() != NodeKind::List {
            warn!(node = %id, parent = %link.id, "Only list children can be moved, ignoring");
            return Ok(ApplyResult::Unmodified);
        }
        let position = match Position::parse(parent_key) {
            Ok(position) => position,
            Err(err) => {
                warn!(node = %id, error = %err, "Move has an invalid list position, ignoring");
                return Ok(ApplyResult::Unmodified);
            }
        };
        if link.key == position.as_str() {
            return Ok(ApplyResult::Unmodified);
        }

        let mut changes = Vec::new();
        if let Some(occupant) = self.list(&link.id)?.occupant(&position).cloned() {
            changes.push(self.shift_list_child(&link.id, &occupant, &position)?);
        }

        let list = self.list_mut(&link.id)?;
        let previous_index = list.index_of(id).ok_or_else(|| StorageError::Structural {
            reason: format!("node {id} is missing from its list {}", link.id),
        })?;
        list.remove(previous_index);
        let index = list.insert(position.clone(), id.clone());
        self.set_parent_key(id, position.to_string());
        self.invalidate(&link.id);
        changes.push(ListChange::Move {
            index,
            previous_index,
            item: self.to_immutable(id)?,
        });

        let update = StorageUpdate::list(link.id.clone(), self.path(&link.id), changes);
        Ok(ApplyResult::modified(
            update,
            vec![Op::set_parent_key(id.clone(), link.key)],
        ))
    }
}
