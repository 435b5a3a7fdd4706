//! Change descriptions delivered to subscribers.
//!
//! Each applied op yields one or more [`StorageUpdate`]s. Within a batch the
//! updates are collected in an [`UpdateSet`] which merges all changes to the
//! same node into a single update.

use std::collections::{BTreeMap, HashMap};

use super::{Immutable, NodeId};

/// What happened to a key of an object or map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChange {
    Updated,
    Deleted,
}

/// One step of a list update. Indices refer to the list after all preceding
/// steps of the same update have been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    Insert {
        index: usize,
        item: Immutable,
    },
    Delete {
        index: usize,
        deleted: Immutable,
    },
    Move {
        index: usize,
        previous_index: usize,
        item: Immutable,
    },
    Set {
        index: usize,
        item: Immutable,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Object(BTreeMap<String, KeyChange>),
    Map(BTreeMap<String, KeyChange>),
    List(Vec<ListChange>),
}

/// Changes to a single container node.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUpdate {
    pub node: NodeId,
    pub kind: UpdateKind,
    /// Ancestors of `node`, root first.
    pub path: Vec<NodeId>,
}

impl StorageUpdate {
    pub(crate) fn object(node: NodeId, path: Vec<NodeId>, key: &str, change: KeyChange) -> Self {
        Self {
            node,
            kind: UpdateKind::Object(BTreeMap::from([(key.to_string(), change)])),
            path,
        }
    }

    pub(crate) fn map(node: NodeId, path: Vec<NodeId>, key: &str, change: KeyChange) -> Self {
        Self {
            node,
            kind: UpdateKind::Map(BTreeMap::from([(key.to_string(), change)])),
            path,
        }
    }

    pub(crate) fn list(node: NodeId, path: Vec<NodeId>, changes: Vec<ListChange>) -> Self {
        Self {
            node,
            kind: UpdateKind::List(changes),
            path,
        }
    }

    /// True if this update touches `id` or anything below it.
    pub fn affects(&self, id: &NodeId) -> bool {
        &self.node == id || self.path.contains(id)
    }

    /// Folds `other` (a later update of the same node) into this one.
    pub fn merge(&mut self, other: StorageUpdate) {
        debug_assert_eq!(self.node, other.node);
        match (&mut self.kind, other.kind) {
            (UpdateKind::Object(mine), UpdateKind::Object(theirs))
            | (UpdateKind::Map(mine), UpdateKind::Map(theirs)) => mine.extend(theirs),
            (UpdateKind::List(mine), UpdateKind::List(theirs)) => mine.extend(theirs),
            // The node was replaced by one of another kind under the same id.
            (mine, theirs) => *mine = theirs,
        }
    }

    pub fn keys(&self) -> Option<&BTreeMap<String, KeyChange>> {
        match &self.kind {
            UpdateKind::Object(keys) | UpdateKind::Map(keys) => Some(keys),
            UpdateKind::List(_) => None,
        }
    }

    pub fn list_changes(&self) -> Option<&[ListChange]> {
        match &self.kind {
            UpdateKind::List(changes) => Some(changes),
            _ => None,
        }
    }
}

/// Updates accumulated over a batch, one entry per node in first-touch order.
#[derive(Debug, Default)]
pub struct UpdateSet {
    updates: Vec<StorageUpdate>,
    index: HashMap<NodeId, usize>,
}

impl UpdateSet {
    pub fn push(&mut self, update: StorageUpdate) {
        match self.index.get(&update.node) {
            Some(&i) => self.updates[i].merge(update),
            None => {
                self.index.insert(update.node.clone(), self.updates.len());
                self.updates.push(update);
            }
        }
    }

    pub fn extend(&mut self, updates: impl IntoIterator<Item = StorageUpdate>) {
        for update in updates {
            self.push(update);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn into_vec(self) -> Vec<StorageUpdate> {
        self.updates
    }
}
