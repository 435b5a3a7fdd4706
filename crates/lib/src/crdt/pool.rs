//! The node arena.
//!
//! [`Pool`] owns every node of a room's storage tree keyed by [`NodeId`].
//! Parents reference children by id and children keep a [`ParentLink`] back,
//! so the tree has no owning cycles. The pool also keeps the cached immutable
//! projection of each node and invalidates it along the ancestor chain when a
//! node changes.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use tracing::{debug, trace, warn};

use super::{
    IdGenerator, Immutable, NodeId, NodeKind, StorageError, StorageUpdate,
    node::{ListBody, MapBody, Node, NodeBody, ObjectBody, ParentLink, Prop},
};
use crate::{
    Result,
    op::{CreateOp, Intent, Op, StorageItem},
    position::Position,
};

/// Where an op being applied came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSource {
    /// Issued by this client; records key ownership.
    Local,
    /// Delivered by the server from another client.
    Remote,
}

/// Outcome of applying a single op.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyResult {
    Modified {
        updates: Vec<StorageUpdate>,
        /// Ops that undo this one, in application order.
        reverse: Vec<Op>,
    },
    Unmodified,
}

impl ApplyResult {
    pub(crate) fn modified(update: StorageUpdate, reverse: Vec<Op>) -> Self {
        ApplyResult::Modified {
            updates: vec![update],
            reverse,
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, ApplyResult::Modified { .. })
    }
}

#[derive(Debug)]
pub struct Pool {
    pub(super) nodes: HashMap<NodeId, Node>,
    ids: IdGenerator,
    seed_positions: bool,
    immutables: RefCell<HashMap<NodeId, Immutable>>,
    /// Nodes this client created that the server has not acknowledged yet,
    /// with the intent of their create.
    unacked_creates: HashMap<NodeId, Option<Intent>>,
    /// Unacknowledged nodes a remote set replaced. Their acks restore them.
    implicitly_deleted: HashSet<NodeId>,
}

impl Pool {
    /// An empty tree holding only the root object.
    pub fn new(ids: IdGenerator, seed_positions: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::root(), empty_root());
        Self {
            nodes,
            ids,
            seed_positions,
            immutables: RefCell::new(HashMap::new()),
            unacked_creates: HashMap::new(),
            implicitly_deleted: HashSet::new(),
        }
    }

    /// Builds a tree from a full storage snapshot.
    ///
    /// Nodes are attached top-down starting at the root. Entries whose parent
    /// never appears, or that cannot be attached, are dropped with a warning.
    pub fn from_items(
        items: Vec<StorageItem>,
        ids: IdGenerator,
        seed_positions: bool,
    ) -> Result<Self> {
        let mut pool = Self::new(ids, seed_positions);
        let mut by_parent: HashMap<NodeId, Vec<StorageItem>> = HashMap::new();

        for (id, serialized) in items {
            match serialized.parent().map(|(parent_id, _)| parent_id.clone()) {
                Some(parent_id) => by_parent
                    .entry(parent_id)
                    .or_default()
                    .push((id, serialized)),
                None if id.is_root() => {
                    if serialized.kind != NodeKind::Object {
                        return Err(StorageError::Structural {
                            reason: format!("root must be an object, got {}", serialized.kind.name()),
                        }
                        .into());
                    }
                    pool.nodes
                        .insert(NodeId::root(), Node::from_serialized(id, &serialized));
                }
                None => warn!(node = %id, "Snapshot entry has no parent, dropping"),
            }
        }

        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(parent_id) = queue.pop_front() {
            let Some(children) = by_parent.remove(&parent_id) else {
                continue;
            };
            for (id, serialized) in children {
                let key = serialized.parent_key.clone().unwrap_or_default();
                let node = Node::from_serialized(id.clone(), &serialized);
                if pool.attach_loaded(node, &parent_id, key) {
                    queue.push_back(id);
                }
            }
        }

        for (parent_id, orphans) in by_parent {
            warn!(
                parent = %parent_id,
                count = orphans.len(),
                "Snapshot entries reference a missing parent, dropping"
            );
        }

        debug!(nodes = pool.nodes.len(), "Loaded storage snapshot");
        Ok(pool)
    }

    fn attach_loaded(&mut self, mut node: Node, parent_id: &NodeId, key: String) -> bool {
        let Some(parent) = self.nodes.get_mut(parent_id) else {
            return false;
        };
        let attached = match &mut parent.body {
            NodeBody::Object(object) => {
                object.props.insert(key.clone(), Prop::Node(node.id.clone()));
                true
            }
            NodeBody::Map(map) => {
                map.entries.insert(key.clone(), node.id.clone());
                true
            }
            NodeBody::List(list) => match Position::parse(key.as_str()) {
                Ok(position) if list.occupant(&position).is_none() => {
                    list.insert(position, node.id.clone());
                    true
                }
                Ok(_) => {
                    warn!(node = %node.id, position = %key, "Snapshot list position already taken, dropping");
                    false
                }
                Err(err) => {
                    warn!(node = %node.id, error = %err, "Snapshot list entry has invalid position, dropping");
                    false
                }
            },
            NodeBody::Register(_) => {
                warn!(node = %node.id, parent = %parent_id, "Snapshot entry attached to a register, dropping");
                false
            }
        };
        if attached {
            node.parent = Some(ParentLink {
                id: parent_id.clone(),
                key,
            });
            self.nodes.insert(node.id.clone(), node);
        }
        attached
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut IdGenerator {
        &mut self.ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| StorageError::UnknownNode { id: id.clone() }.into())
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| StorageError::UnknownNode { id: id.clone() }.into())
    }

    pub(crate) fn object(&self, id: &NodeId) -> Result<&ObjectBody> {
        let node = self.node(id)?;
        match &node.body {
            NodeBody::Object(object) => Ok(object),
            _ => Err(node.type_mismatch(NodeKind::Object).into()),
        }
    }

    pub(crate) fn object_mut(&mut self, id: &NodeId) -> Result<&mut ObjectBody> {
        let node = self.node_mut(id)?;
        let actual = node.kind();
        match &mut node.body {
            NodeBody::Object(object) => Ok(object),
            _ => Err(type_mismatch(id, NodeKind::Object, actual).into()),
        }
    }

    pub(crate) fn list(&self, id: &NodeId) -> Result<&ListBody> {
        let node = self.node(id)?;
        match &node.body {
            NodeBody::List(list) => Ok(list),
            _ => Err(node.type_mismatch(NodeKind::List).into()),
        }
    }

    pub(crate) fn list_mut(&mut self, id: &NodeId) -> Result<&mut ListBody> {
        let node = self.node_mut(id)?;
        let actual = node.kind();
        match &mut node.body {
            NodeBody::List(list) => Ok(list),
            _ => Err(type_mismatch(id, NodeKind::List, actual).into()),
        }
    }

    pub(crate) fn map(&self, id: &NodeId) -> Result<&MapBody> {
        let node = self.node(id)?;
        match &node.body {
            NodeBody::Map(map) => Ok(map),
            _ => Err(node.type_mismatch(NodeKind::Map).into()),
        }
    }

    pub(crate) fn map_mut(&mut self, id: &NodeId) -> Result<&mut MapBody> {
        let node = self.node_mut(id)?;
        let actual = node.kind();
        match &mut node.body {
            NodeBody::Map(map) => Ok(map),
            _ => Err(type_mismatch(id, NodeKind::Map, actual).into()),
        }
    }

    /// Ancestors of `id`, root first.
    pub fn path(&self, id: &NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(id).and_then(|n| n.parent.as_ref());
        while let Some(link) = current {
            path.push(link.id.clone());
            current = self.nodes.get(&link.id).and_then(|n| n.parent.as_ref());
        }
        path.reverse();
        path
    }

    /// Drops the cached projection of `id` and all of its ancestors.
    pub(crate) fn invalidate(&self, id: &NodeId) {
        let mut cache = self.immutables.borrow_mut();
        cache.remove(id);
        let mut current = self.nodes.get(id).and_then(|n| n.parent.as_ref());
        while let Some(link) = current {
            cache.remove(&link.id);
            current = self.nodes.get(&link.id).and_then(|n| n.parent.as_ref());
        }
    }

    /// Immutable projection of a node, served from cache when unchanged.
    pub fn to_immutable(&self, id: &NodeId) -> Result<Immutable> {
        if let Some(cached) = self.immutables.borrow().get(id) {
            return Ok(cached.clone());
        }
        let node = self.node(id)?;
        let value = match &node.body {
            NodeBody::Register(value) => Immutable::Value(value.clone()),
            NodeBody::Object(object) => {
                let mut entries = BTreeMap::new();
                for (key, prop) in &object.props {
                    let value = match prop {
                        Prop::Value(value) => Immutable::Value(value.clone()),
                        Prop::Node(child) => self.to_immutable(child)?,
                    };
                    entries.insert(key.clone(), value);
                }
                Immutable::Object(Arc::new(entries))
            }
            NodeBody::List(list) => Immutable::List(Arc::new(
                list.items
                    .iter()
                    .map(|item| self.to_immutable(&item.id))
                    .collect::<Result<Vec<_>>>()?,
            )),
            NodeBody::Map(map) => {
                let mut entries = BTreeMap::new();
                for (key, child) in &map.entries {
                    entries.insert(key.clone(), self.to_immutable(child)?);
                }
                Immutable::Map(Arc::new(entries))
            }
        };
        trace!(node = %id, "Computed immutable projection");
        self.immutables
            .borrow_mut()
            .insert(id.clone(), value.clone());
        Ok(value)
    }

    /// Create ops that rebuild `id` and its whole subtree at its current
    /// location, parents first.
    pub(crate) fn subtree_ops(&self, id: &NodeId) -> Result<Vec<Op>> {
        let mut ops = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            let node = self.node(&current)?;
            let link = node.parent.as_ref().ok_or_else(|| StorageError::Structural {
                reason: format!("node {current} has no parent link"),
            })?;
            ops.push(Op::Create(CreateOp {
                op_id: None,
                id: current.clone(),
                parent_id: link.id.clone(),
                parent_key: link.key.clone(),
                kind: node.create_kind(),
                intent: None,
                deleted_id: None,
            }));
            // Reverse so children pop in display order.
            stack.extend(node.child_ids().into_iter().rev());
        }
        Ok(ops)
    }

    pub(super) fn track_unacked_create(&mut self, op: &CreateOp) {
        self.unacked_creates.insert(op.id.clone(), op.intent);
    }

    /// Forgets the unacknowledged create of `id`. True if a remote set had
    /// replaced the node in the meantime.
    pub(super) fn untrack_unacked_create(&mut self, id: &NodeId) -> bool {
        self.unacked_creates.remove(id);
        self.implicitly_deleted.remove(id)
    }

    /// Records our own unacknowledged set under `id`, and the unacknowledged
    /// nodes below it, before a remote set replaces it.
    pub(super) fn note_displaced(&mut self, id: &NodeId) {
        if self.unacked_creates.get(id) != Some(&Some(Intent::Set)) {
            return;
        }
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.child_ids());
            }
            if self.unacked_creates.contains_key(&current) {
                debug!(node = %current, "Pending node replaced by a remote set");
                self.implicitly_deleted.insert(current);
            }
        }
    }

    /// Removes `id` and its descendants from the arena. The parent container
    /// must already have dropped its reference.
    pub(crate) fn remove_subtree(&mut self, id: &NodeId) -> usize {
        let mut removed = 0;
        let mut stack = vec![id.clone()];
        let mut cache = self.immutables.borrow_mut();
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.child_ids());
                cache.remove(&current);
                removed += 1;
            }
        }
        removed
    }

    /// Inserts a freshly created node under `parent` without touching the
    /// parent container.
    pub(crate) fn insert_node(&mut self, mut node: Node, parent: ParentLink) {
        node.parent = Some(parent);
        self.nodes.insert(node.id.clone(), node);
    }

    /// Updates the key stored in a node's parent link.
    pub(crate) fn set_parent_key(&mut self, id: &NodeId, key: String) {
        if let Some(link) = self.nodes.get_mut(id).and_then(|n| n.parent.as_mut()) {
            link.key = key;
        }
    }

    /// A fresh position for inserting into `list_id` at `index`.
    pub(crate) fn new_list_position(&mut self, list_id: &NodeId, index: usize) -> Result<Position> {
        let list = self.list(list_id)?;
        let lo = index.checked_sub(1).and_then(|i| list.position_at(i)).cloned();
        let hi = list.position_at(index).cloned();
        Ok(self.position_between(lo.as_ref(), hi.as_ref()))
    }

    /// A position strictly between `lo` and `hi`, seeded with this client's
    /// identity when seeding is enabled.
    pub(crate) fn position_between(&mut self, lo: Option<&Position>, hi: Option<&Position>) -> Position {
        if self.seed_positions {
            let seed = self.ids.next_position_seed();
            Position::make_seeded(lo, hi, &seed)
        } else {
            Position::make(lo, hi)
        }
    }

    /// Forgets all key ownership from unacknowledged local writes.
    pub(crate) fn clear_unacked(&mut self) {
        self.unacked_creates.clear();
        self.implicitly_deleted.clear();
        for node in self.nodes.values_mut() {
            match &mut node.body {
                NodeBody::Object(object) => object.unacked.clear(),
                NodeBody::Map(map) => map.unacked.clear(),
                _ => {}
            }
        }
    }

    /// Full storage snapshot, every parent before its children.
    pub fn serialize(&self) -> Result<Vec<StorageItem>> {
        let mut items = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(id) = queue.pop_front() {
            let node = self.node(&id)?;
            items.push((id, node.serialize()?));
            queue.extend(node.child_ids());
        }
        if items.len() != self.nodes.len() {
            return Err(StorageError::Structural {
                reason: format!(
                    "{} nodes are unreachable from the root",
                    self.nodes.len() - items.len()
                ),
            }
            .into());
        }
        Ok(items)
    }
}

fn type_mismatch(id: &NodeId, expected: NodeKind, actual: NodeKind) -> StorageError {
    StorageError::TypeMismatch {
        id: id.clone(),
        expected: expected.name(),
        actual: actual.name(),
    }
}

fn empty_root() -> Node {
    Node {
        id: NodeId::root(),
        parent: None,
        body: NodeBody::Object(ObjectBody::default()),
    }
}
