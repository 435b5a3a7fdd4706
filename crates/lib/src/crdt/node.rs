//! Node records held in the [`Pool`](super::Pool) arena.
//!
//! A node never owns its children: containers store child [`NodeId`]s and each
//! child stores a [`ParentLink`] back to its container. All cross-node
//! navigation goes through the pool.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};

use super::{NodeId, OpId, StorageError};
use crate::{
    Result,
    op::{CreateKind, OpError, SerializedNode},
    position::Position,
};

/// The four node kinds. Serialized as the integer node type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u8")]
#[repr(u8)]
pub enum NodeKind {
    Object = 0,
    List = 1,
    Map = 2,
    Register = 3,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::List => "list",
            NodeKind::Map => "map",
            NodeKind::Register => "register",
        }
    }
}

impl TryFrom<u64> for NodeKind {
    type Error = OpError;

    fn try_from(code: u64) -> std::result::Result<Self, Self::Error> {
        Ok(match code {
            0 => NodeKind::Object,
            1 => NodeKind::List,
            2 => NodeKind::Map,
            3 => NodeKind::Register,
            _ => return Err(OpError::UnknownNodeType { code }),
        })
    }
}

impl From<NodeKind> for u8 {
    fn from(kind: NodeKind) -> Self {
        kind as u8
    }
}

/// Where a node is attached: its container and the key it sits under.
///
/// For list children the key is the child's position string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub id: NodeId,
    pub key: String,
}

/// A property of an object: either plain JSON or a child node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Prop {
    Value(Json),
    Node(NodeId),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectBody {
    pub props: BTreeMap<String, Prop>,
    /// Keys written by local ops the server has not acknowledged yet, with
    /// the last such op. Remote writes to these keys are ignored.
    pub unacked: HashMap<String, OpId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListItem {
    pub position: Position,
    pub id: NodeId,
}

/// List children kept sorted by position.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListBody {
    pub items: Vec<ListItem>,
}

impl ListBody {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `Ok(index)` if a child sits at `position`, otherwise the insertion index.
    pub fn search(&self, position: &Position) -> std::result::Result<usize, usize> {
        self.items
            .binary_search_by(|item| item.position.cmp(position))
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    pub fn occupant(&self, position: &Position) -> Option<&NodeId> {
        self.search(position).ok().map(|i| &self.items[i].id)
    }

    /// Inserts keeping the order; the position must be free.
    pub fn insert(&mut self, position: Position, id: NodeId) -> usize {
        let index = match self.search(&position) {
            Ok(index) | Err(index) => index,
        };
        self.items.insert(index, ListItem { position, id });
        index
    }

    pub fn remove(&mut self, index: usize) -> ListItem {
        self.items.remove(index)
    }

    pub fn position_at(&self, index: usize) -> Option<&Position> {
        self.items.get(index).map(|item| &item.position)
    }

    /// A free position directly after `position`, before the next child.
    pub fn position_after(&self, position: &Position) -> Position {
        let next = match self.search(position) {
            Ok(index) => index + 1,
            Err(index) => index,
        };
        Position::make(Some(position), self.position_at(next))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MapBody {
    pub entries: BTreeMap<String, NodeId>,
    /// Same role as [`ObjectBody::unacked`].
    pub unacked: HashMap<String, OpId>,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeBody {
    Object(ObjectBody),
    List(ListBody),
    Map(MapBody),
    Register(Json),
}

/// One element of the storage tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) body: NodeBody,
}

impl Node {
    /// A detached node built from a create payload.
    pub(crate) fn from_create(id: NodeId, kind: &CreateKind) -> Self {
        let body = match kind {
            CreateKind::Object(data) => NodeBody::Object(ObjectBody {
                props: data
                    .iter()
                    .map(|(k, v)| (k.clone(), Prop::Value(v.clone())))
                    .collect(),
                unacked: HashMap::new(),
            }),
            CreateKind::List => NodeBody::List(ListBody::default()),
            CreateKind::Map => NodeBody::Map(MapBody::default()),
            CreateKind::Register(value) => NodeBody::Register(value.clone()),
        };
        Self {
            id,
            parent: None,
            body,
        }
    }

    /// A detached node built from a snapshot entry. Children attach later.
    pub(crate) fn from_serialized(id: NodeId, serialized: &SerializedNode) -> Self {
        let kind = match serialized.kind {
            NodeKind::Object => CreateKind::Object(serialized.object_data()),
            NodeKind::List => CreateKind::List,
            NodeKind::Map => CreateKind::Map,
            NodeKind::Register => {
                CreateKind::Register(serialized.data.clone().unwrap_or(Json::Null))
            }
        };
        Self::from_create(id, &kind)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn kind(&self) -> NodeKind {
        match &self.body {
            NodeBody::Object(_) => NodeKind::Object,
            NodeBody::List(_) => NodeKind::List,
            NodeBody::Map(_) => NodeKind::Map,
            NodeBody::Register(_) => NodeKind::Register,
        }
    }

    /// Direct children in display order.
    pub fn child_ids(&self) -> Vec<NodeId> {
        match &self.body {
            NodeBody::Object(object) => object
                .props
                .values()
                .filter_map(|prop| match prop {
                    Prop::Node(id) => Some(id.clone()),
                    Prop::Value(_) => None,
                })
                .collect(),
            NodeBody::List(list) => list.items.iter().map(|item| item.id.clone()).collect(),
            NodeBody::Map(map) => map.entries.values().cloned().collect(),
            NodeBody::Register(_) => Vec::new(),
        }
    }

    /// The create payload that rebuilds this node (without its children).
    pub(crate) fn create_kind(&self) -> CreateKind {
        match &self.body {
            NodeBody::Object(object) => CreateKind::Object(plain_props(object)),
            NodeBody::List(_) => CreateKind::List,
            NodeBody::Map(_) => CreateKind::Map,
            NodeBody::Register(value) => CreateKind::Register(value.clone()),
        }
    }

    /// Serializes this node for a full storage snapshot.
    pub fn serialize(&self) -> Result<SerializedNode> {
        if self.parent.is_none() && !self.id.is_root() {
            return Err(StorageError::Structural {
                reason: format!("node {} has no parent link", self.id),
            }
            .into());
        }
        let data = match &self.body {
            NodeBody::Object(object) => Some(Json::Object(plain_props(object))),
            NodeBody::Register(value) => Some(value.clone()),
            NodeBody::List(_) | NodeBody::Map(_) => None,
        };
        Ok(SerializedNode {
            kind: self.kind(),
            parent_id: self.parent.as_ref().map(|p| p.id.clone()),
            parent_key: self.parent.as_ref().map(|p| p.key.clone()),
            data,
        })
    }

    pub(crate) fn type_mismatch(&self, expected: NodeKind) -> StorageError {
        StorageError::TypeMismatch {
            id: self.id.clone(),
            expected: expected.name(),
            actual: self.kind().name(),
        }
    }
}

fn plain_props(object: &ObjectBody) -> JsonMap<String, Json> {
    object
        .props
        .iter()
        .filter_map(|(k, prop)| match prop {
            Prop::Value(v) => Some((k.clone(), v.clone())),
            Prop::Node(_) => None,
        })
        .collect()
}
