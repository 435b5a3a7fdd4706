//! Room sessions.
//!
//! A [`Room`] is one client's view of a replicated storage tree. It exposes
//! the local mutation API, applies every change optimistically, keeps the
//! resulting ops pending until the server echoes them back, and records
//! reverse ops for undo and redo.
//!
//! Everything runs on the thread that owns the room. Calls never block:
//! local mutations return once applied, and server traffic is fed in through
//! [`Room::apply_remote_operations`] and [`Room::reconnect_with_snapshot`].
//!
//! ## Example
//!
//! ```
//! use canopy::{LiveValue, NodeId, Room, RoomConfig};
//!
//! let mut room = Room::new(RoomConfig::default().with_connection_id(1));
//! let items = room.object_set(&NodeId::root(), "items", LiveValue::list(Vec::<LiveValue>::new()))?;
//! let items = items.expect("lists are nodes");
//! room.list_push(&items, "a")?;
//! room.list_push(&items, "b")?;
//! assert_eq!(room.root()?.to_json(), serde_json::json!({"items": ["a", "b"]}));
//! # Ok::<(), canopy::Error>(())
//! ```

use std::collections::HashSet;

use serde_json::Map as JsonMap;
use tracing::{debug, info, trace, warn};

use crate::{
    Result, RoomConfig,
    crdt::{
        ApplyResult, IdGenerator, Immutable, LiveValue, NodeId, NodeKind, OpSource, ParentLink, Pool,
        StorageError, StorageUpdate, UpdateSet, node::Prop,
    },
    op::{
        Intent, Op, StorageItem,
        wire::{decode_ops, decode_snapshot, encode_snapshot},
    },
    position::Position,
    snapshot::{Scope, Source},
    transport::Transport,
};

pub mod history;
pub mod pending;
mod resync;
pub mod subscriptions;

use history::History;
pub use history::HistoryEntry;
pub use pending::{PendingOp, PendingOps};
use subscriptions::Subscriptions;
pub use subscriptions::{SubscribeOptions, SubscriptionId};

/// Work accumulated until the outermost batch ends.
#[derive(Default)]
struct Frame {
    depth: usize,
    outgoing: Vec<Op>,
    reverse: Vec<Op>,
    updates: UpdateSet,
}

pub struct Room {
    config: RoomConfig,
    read_only: bool,
    pool: Pool,
    pending: PendingOps,
    history: History,
    subscriptions: Subscriptions,
    transport: Option<Box<dyn Transport>>,
    scope: Scope,
    storage: Source<Immutable>,
    frame: Frame,
}

impl Room {
    /// A room with empty storage.
    pub fn new(config: RoomConfig) -> Self {
        let pool = Pool::new(id_generator(&config), config.seed_positions);
        Self::with_pool(config, pool, Immutable::Object(Default::default()))
    }

    /// A room loaded from a full storage snapshot.
    pub fn from_snapshot(config: RoomConfig, items: Vec<StorageItem>) -> Result<Self> {
        let pool = Pool::from_items(items, id_generator(&config), config.seed_positions)?;
        let root = pool.to_immutable(&NodeId::root())?;
        info!(nodes = pool.len(), "Room loaded from snapshot");
        Ok(Self::with_pool(config, pool, root))
    }

    /// A room loaded from a JSON-encoded storage snapshot.
    pub fn from_snapshot_json(config: RoomConfig, json: &str) -> Result<Self> {
        Self::from_snapshot(config, decode_snapshot(json)?)
    }

    fn with_pool(config: RoomConfig, pool: Pool, root: Immutable) -> Self {
        let scope = Scope::new();
        let storage = Source::new(&scope, root);
        Self {
            read_only: config.read_only,
            history: History::new(config.history_limit),
            config,
            pool,
            pending: PendingOps::default(),
            subscriptions: Subscriptions::default(),
            transport: None,
            scope,
            storage,
            frame: Frame::default(),
        }
    }

    /// Attaches the sink for outgoing ops.
    pub fn set_transport(&mut self, transport: impl Transport + 'static) {
        self.transport = Some(Box::new(transport));
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.set_transport(transport);
        self
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Adopts the server-assigned connection id for all newly generated ids.
    pub fn set_connection_id(&mut self, connection_id: u32) {
        info!(connection_id, "Connection id assigned");
        self.config.connection_id = Some(connection_id);
        self.pool.ids_mut().set_connection_id(connection_id);
    }

    /// Prefix of ids generated by this client.
    pub fn id_prefix(&self) -> &str {
        self.pool.ids().prefix()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// The batching scope shared by this room's snapshot sources.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// A source holding the storage projection, updated once per
    /// modifying batch. Derive [`Cache`](crate::snapshot::Cache)s from it.
    pub fn storage(&self) -> Source<Immutable> {
        self.storage.clone()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn pending(&self) -> &PendingOps {
        &self.pending
    }

    // ---- reads ----

    /// Immutable projection of the whole storage tree.
    pub fn root(&self) -> Result<Immutable> {
        self.pool.to_immutable(&NodeId::root())
    }

    pub fn to_immutable(&self, id: &NodeId) -> Result<Immutable> {
        self.pool.to_immutable(id)
    }

    pub fn node_kind(&self, id: &NodeId) -> Result<NodeKind> {
        Ok(self.pool.node(id)?.kind())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.pool.contains(id)
    }

    /// Where `id` is attached, or `None` for the root.
    pub fn parent_of(&self, id: &NodeId) -> Result<Option<ParentLink>> {
        Ok(self.pool.node(id)?.parent().cloned())
    }

    /// Child node ids; list children come in list order.
    pub fn children_of(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        Ok(self.pool.node(id)?.child_ids())
    }

    /// Entry of an object or map.
    pub fn get(&self, id: &NodeId, key: &str) -> Result<Option<Immutable>> {
        Ok(self.to_immutable(id)?.get(key).cloned())
    }

    /// Id of the child node stored under `key` of an object or map.
    pub fn child(&self, id: &NodeId, key: &str) -> Result<Option<NodeId>> {
        let node = self.pool.node(id)?;
        match node.kind() {
            NodeKind::Object => Ok(match self.pool.object(id)?.props.get(key) {
                Some(Prop::Node(child)) => Some(child.clone()),
                _ => None,
            }),
            NodeKind::Map => Ok(self.pool.map(id)?.entries.get(key).cloned()),
            _ => Err(node.type_mismatch(NodeKind::Object).into()),
        }
    }

    /// Keys of an object or map.
    pub fn keys(&self, id: &NodeId) -> Result<Vec<String>> {
        let node = self.pool.node(id)?;
        match node.kind() {
            NodeKind::Object => Ok(self.pool.object(id)?.props.keys().cloned().collect()),
            NodeKind::Map => Ok(self.pool.map(id)?.entries.keys().cloned().collect()),
            _ => Err(node.type_mismatch(NodeKind::Object).into()),
        }
    }

    pub fn list_len(&self, id: &NodeId) -> Result<usize> {
        Ok(self.pool.list(id)?.len())
    }

    pub fn list_get(&self, id: &NodeId, index: usize) -> Result<Option<Immutable>> {
        match self.list_child(id, index)? {
            Some(child) => Ok(Some(self.pool.to_immutable(&child)?)),
            None => Ok(None),
        }
    }

    /// Id of the list child at `index`.
    pub fn list_child(&self, id: &NodeId, index: usize) -> Result<Option<NodeId>> {
        Ok(self.pool.list(id)?.items.get(index).map(|item| item.id.clone()))
    }

    /// Full storage snapshot, every parent before its children.
    pub fn get_full_state_snapshot(&self) -> Result<Vec<StorageItem>> {
        self.pool.serialize()
    }

    pub fn get_full_state_json(&self) -> Result<String> {
        encode_snapshot(&self.pool.serialize()?)
    }

    // ---- object mutations ----

    /// Sets one key of an object. Returns the id of the new child node when
    /// `value` is a container.
    pub fn object_set(
        &mut self,
        id: &NodeId,
        key: impl Into<String>,
        value: impl Into<LiveValue>,
    ) -> Result<Option<NodeId>> {
        let key = key.into();
        let value = value.into();
        let is_node = value.is_node();
        self.object_update(id, [(key.clone(), value)])?;
        if is_node {
            self.child(id, &key)
        } else {
            Ok(None)
        }
    }

    /// Sets several keys of an object as one mutation.
    pub fn object_update<K, V>(
        &mut self,
        id: &NodeId,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Into<String>,
        V: Into<LiveValue>,
    {
        self.ensure_writable("update object")?;
        self.pool.object(id)?;

        let mut data = JsonMap::new();
        let mut ops = Vec::new();
        for (key, value) in entries {
            let key = key.into();
            match value.into() {
                LiveValue::Json(value) => {
                    data.insert(key, value);
                }
                node => {
                    node.to_create_ops(self.pool.ids_mut(), id, &key, &mut ops);
                }
            }
        }
        if !data.is_empty() {
            ops.insert(
                0,
                Op::UpdateObject {
                    op_id: None,
                    id: id.clone(),
                    data,
                },
            );
        }
        self.commit(ops)
    }

    /// Removes a key from an object. Returns whether the key existed.
    pub fn object_delete(&mut self, id: &NodeId, key: &str) -> Result<bool> {
        self.ensure_writable("delete object key")?;
        if !self.pool.object(id)?.props.contains_key(key) {
            return Ok(false);
        }
        self.commit(vec![Op::DeleteObjectKey {
            op_id: None,
            id: id.clone(),
            key: key.to_string(),
        }])?;
        Ok(true)
    }

    // ---- list mutations ----

    pub fn list_push(&mut self, id: &NodeId, value: impl Into<LiveValue>) -> Result<NodeId> {
        let len = self.pool.list(id)?.len();
        self.list_insert(id, len, value)
    }

    /// Inserts before the item at `index`; `index == len` appends.
    pub fn list_insert(
        &mut self,
        id: &NodeId,
        index: usize,
        value: impl Into<LiveValue>,
    ) -> Result<NodeId> {
        self.ensure_writable("insert into list")?;
        let len = self.pool.list(id)?.len();
        if index > len {
            return Err(StorageError::IndexOutOfBounds { index, len }.into());
        }
        let position = self.pool.new_list_position(id, index)?;
        let mut ops = Vec::new();
        let child = value
            .into()
            .to_create_ops(self.pool.ids_mut(), id, position.as_str(), &mut ops);
        self.commit(ops)?;
        Ok(child)
    }

    /// Replaces the item at `index` in place.
    pub fn list_set(
        &mut self,
        id: &NodeId,
        index: usize,
        value: impl Into<LiveValue>,
    ) -> Result<NodeId> {
        self.ensure_writable("set list item")?;
        let list = self.pool.list(id)?;
        let item = list
            .items
            .get(index)
            .ok_or(StorageError::IndexOutOfBounds {
                index,
                len: list.len(),
            })?;
        let (position, previous) = (item.position.clone(), item.id.clone());

        let mut ops = Vec::new();
        let child = value
            .into()
            .to_create_ops(self.pool.ids_mut(), id, position.as_str(), &mut ops);
        if let Some(Op::Create(create)) = ops.first_mut() {
            create.intent = Some(Intent::Set);
            create.deleted_id = Some(previous);
        }
        self.commit(ops)?;
        Ok(child)
    }

    /// Moves the item at `from` so it ends up at index `to`.
    pub fn list_move(&mut self, id: &NodeId, from: usize, to: usize) -> Result<()> {
        self.ensure_writable("move list item")?;
        let list = self.pool.list(id)?;
        let len = list.len();
        for index in [from, to] {
            if index >= len {
                return Err(StorageError::IndexOutOfBounds { index, len }.into());
            }
        }
        if from == to {
            return Ok(());
        }
        let (lo, hi) = if to < from {
            (
                to.checked_sub(1).and_then(|i| list.position_at(i)).cloned(),
                list.position_at(to).cloned(),
            )
        } else {
            (list.position_at(to).cloned(), list.position_at(to + 1).cloned())
        };
        let child = list.items[from].id.clone();
        let position = self.pool.position_between(lo.as_ref(), hi.as_ref());
        self.commit(vec![Op::set_parent_key(child, position.to_string())])
    }

    pub fn list_delete(&mut self, id: &NodeId, index: usize) -> Result<()> {
        self.ensure_writable("delete list item")?;
        let list = self.pool.list(id)?;
        let child = list
            .items
            .get(index)
            .map(|item| item.id.clone())
            .ok_or(StorageError::IndexOutOfBounds {
                index,
                len: list.len(),
            })?;
        self.commit(vec![Op::delete(child)])
    }

    pub fn list_clear(&mut self, id: &NodeId) -> Result<()> {
        self.ensure_writable("clear list")?;
        let ops = self
            .pool
            .list(id)?
            .items
            .iter()
            .map(|item| Op::delete(item.id.clone()))
            .collect();
        self.commit(ops)
    }

    // ---- map mutations ----

    pub fn map_set(
        &mut self,
        id: &NodeId,
        key: impl Into<String>,
        value: impl Into<LiveValue>,
    ) -> Result<NodeId> {
        self.ensure_writable("set map entry")?;
        self.pool.map(id)?;
        let key = key.into();
        let mut ops = Vec::new();
        let child = value
            .into()
            .to_create_ops(self.pool.ids_mut(), id, &key, &mut ops);
        self.commit(ops)?;
        Ok(child)
    }

    /// Removes a map entry. Returns whether the key existed.
    pub fn map_delete(&mut self, id: &NodeId, key: &str) -> Result<bool> {
        self.ensure_writable("delete map entry")?;
        let Some(child) = self.pool.map(id)?.entries.get(key).cloned() else {
            return Ok(false);
        };
        self.commit(vec![Op::delete(child)])?;
        Ok(true)
    }

    // ---- batching and history ----

    /// Runs `f` as one unit: its mutations form a single history entry, are
    /// sent together and notify subscribers once. Nested batches join the
    /// outermost one.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Room) -> Result<R>) -> Result<R> {
        self.frame.depth += 1;
        let result = f(self);
        self.frame.depth -= 1;
        let flushed = self.end_operation();
        let value = result?;
        flushed?;
        Ok(value)
    }

    pub fn is_batching(&self) -> bool {
        self.frame.depth > 0
    }

    /// Reverts the most recent history entry. No-op when there is none.
    pub fn undo(&mut self) -> Result<()> {
        self.ensure_history_allowed("undo")?;
        let Some(entry) = self.history.pop_undo() else {
            return Ok(());
        };
        debug!(ops = entry.len(), "Undo");
        let redo = self.apply_local(entry)?;
        self.history.push_redo(redo);
        self.flush()
    }

    /// Reapplies the most recently undone entry. No-op when there is none.
    pub fn redo(&mut self) -> Result<()> {
        self.ensure_history_allowed("redo")?;
        let Some(entry) = self.history.pop_redo() else {
            return Ok(());
        };
        debug!(ops = entry.len(), "Redo");
        let undo = self.apply_local(entry)?;
        self.history.push_undo(undo);
        self.flush()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Coalesces all following mutations into one history entry until
    /// [`Room::resume_history`].
    pub fn pause_history(&mut self) {
        self.history.pause();
    }

    pub fn resume_history(&mut self) {
        self.history.resume();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn ensure_history_allowed(&mut self, operation: &'static str) -> Result<()> {
        self.ensure_writable(operation)?;
        if self.is_batching() {
            return Err(StorageError::HistoryDuringBatch { operation }.into());
        }
        // Undoing ends a paused gesture.
        self.history.resume();
        Ok(())
    }

    // ---- subscriptions ----

    /// Calls `callback` after every batch that changed `target` (or, with
    /// `is_deep`, anything below it).
    pub fn subscribe(
        &mut self,
        target: &NodeId,
        options: SubscribeOptions,
        callback: impl FnMut(&[StorageUpdate]) + 'static,
    ) -> Result<SubscriptionId> {
        self.pool.node(target)?;
        Ok(self
            .subscriptions
            .add(target.clone(), options, Box::new(callback)))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(id)
    }

    // ---- server traffic ----

    /// Applies ops delivered by the server.
    ///
    /// An op carrying the id of one of our pending ops is its
    /// acknowledgment; everything else is a remote change.
    pub fn apply_remote_operations(&mut self, ops: &[Op]) -> Result<()> {
        for op in ops {
            let result = match op.op_id().filter(|op_id| self.pending.contains(op_id)) {
                Some(op_id) => {
                    self.pending.remove(op_id);
                    trace!(op_id = op_id.as_str(), "Acknowledged");
                    let superseded = self.pending.places(op.id());
                    self.pool.apply_ack(op, superseded)?
                }
                None => self.pool.apply(op, OpSource::Remote)?,
            };
            if let ApplyResult::Modified { updates, .. } = result {
                self.frame.updates.extend(updates);
            }
        }
        self.end_operation()
    }

    /// Decodes a JSON array of wire ops and applies it.
    pub fn apply_remote_json(&mut self, json: &str) -> Result<()> {
        let ops = decode_ops(json)?;
        self.apply_remote_operations(&ops)
    }

    // ---- internals ----

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Applies a user mutation and records its reverse for undo.
    fn commit(&mut self, ops: Vec<Op>) -> Result<()> {
        let reverse = self.apply_local(ops)?;
        if !reverse.is_empty() {
            self.history.clear_redo();
            self.frame.reverse.splice(0..0, reverse);
        }
        self.end_operation()
    }

    /// Applies ops as this client's own: each gets a fresh op id, becomes
    /// pending and is queued for sending. Returns the combined reverse,
    /// latest op first.
    fn apply_local(&mut self, ops: Vec<Op>) -> Result<Vec<Op>> {
        let mut created = HashSet::new();
        let mut reverse = Vec::new();
        for mut op in ops {
            op.set_op_id(self.pool.ids_mut().next_op_id());
            self.relocate(&mut op);
            // Children of a node created by the same mutation vanish with it.
            let nested = op
                .as_create()
                .is_some_and(|create| created.contains(&create.parent_id));

            let ApplyResult::Modified {
                updates,
                reverse: undo,
            } = self.pool.apply(&op, OpSource::Local)?
            else {
                debug!(op = op.op_code().name(), node = %op.id(), "Local op changed nothing, dropping");
                continue;
            };
            if let Op::Create(create) = &op {
                created.insert(create.id.clone());
            }
            self.frame.updates.extend(updates);
            let undo = if nested { Vec::new() } else { undo };
            reverse.splice(0..0, undo);
            self.pending.push(op.clone());
            self.frame.outgoing.push(op);
        }
        Ok(reverse)
    }

    /// Moves a local list create or move off a position that is already
    /// taken, so confirmed nodes never shift under our own ops.
    fn relocate(&mut self, op: &mut Op) {
        let (list_id, key, mover) = match op {
            Op::Create(create) if create.intent.is_none() => {
                (create.parent_id.clone(), &mut create.parent_key, create.id.clone())
            }
            Op::SetParentKey { id, parent_key, .. } => {
                let Some(link) = self.pool.get(id).and_then(|n| n.parent()) else {
                    return;
                };
                (link.id.clone(), parent_key, id.clone())
            }
            _ => return,
        };
        let Ok(list) = self.pool.list(&list_id) else {
            return;
        };
        let Ok(position) = Position::parse(key.as_str()) else {
            return;
        };
        let hi = match list.search(&position) {
            Ok(index) if list.items[index].id != mover => list.position_at(index + 1).cloned(),
            _ => return,
        };
        let fresh = self.pool.position_between(Some(&position), hi.as_ref());
        debug!(from = %position, to = %fresh, "List position taken, relocating local op");
        *key = fresh.to_string();
    }

    fn end_operation(&mut self) -> Result<()> {
        if self.is_batching() {
            return Ok(());
        }
        self.flush()
    }

    /// Records history, notifies and sends everything accumulated.
    fn flush(&mut self) -> Result<()> {
        let frame = std::mem::take(&mut self.frame);
        self.history.record(frame.reverse);

        let updates = frame.updates.into_vec();
        if !updates.is_empty() {
            let root = self.pool.to_immutable(&NodeId::root())?;
            self.scope.batch(|| self.storage.set(root));
            self.subscriptions.notify(&updates);
        }

        if !frame.outgoing.is_empty() {
            match &mut self.transport {
                Some(transport) => {
                    if let Err(err) = transport.send(&frame.outgoing) {
                        warn!(error = %err, ops = frame.outgoing.len(), "Failed to send ops; they stay pending until resync");
                    }
                }
                None => trace!(ops = frame.outgoing.len(), "No transport attached, ops stay pending"),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("config", &self.config)
            .field("read_only", &self.read_only)
            .field("nodes", &self.pool.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn id_generator(config: &RoomConfig) -> IdGenerator {
    match config.connection_id {
        Some(connection_id) => IdGenerator::for_connection(connection_id),
        None => IdGenerator::placeholder(),
    }
}
