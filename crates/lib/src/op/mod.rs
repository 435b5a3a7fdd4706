//! The operation model: every mutation of the storage tree as a value.
//!
//! Operations are decoded from their wire form ([`wire::RawOp`]) at the
//! transport boundary into the closed [`Op`] enum, so the tree never has to
//! deal with missing or mistyped fields.

use serde_json::{Map as JsonMap, Value as Json};

use crate::crdt::{NodeId, OpId};

pub mod errors;
pub mod wire;

pub use errors::OpError;
pub use wire::{OpCode, RawOp, SerializedNode, StorageItem};

/// Why a create op was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Replace whatever occupies the target position (idempotent upsert).
    Set,
}

impl Intent {
    /// Wire spelling of the intent.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Set => "set",
        }
    }
}

/// Payload of a create op: which kind of node to build and its initial data.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateKind {
    /// Object with its plain (non-node) properties. Child nodes arrive as
    /// separate create ops.
    Object(JsonMap<String, Json>),
    List,
    Map,
    Register(Json),
}

impl CreateKind {
    pub fn op_code(&self) -> OpCode {
        match self {
            CreateKind::Object(_) => OpCode::CreateObject,
            CreateKind::List => OpCode::CreateList,
            CreateKind::Map => OpCode::CreateMap,
            CreateKind::Register(_) => OpCode::CreateRegister,
        }
    }
}

/// Creates a node and attaches it under `parent_id` at `parent_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOp {
    pub op_id: Option<OpId>,
    pub id: NodeId,
    pub parent_id: NodeId,
    /// Property name for objects and maps, a position for lists.
    pub parent_key: String,
    pub kind: CreateKind,
    pub intent: Option<Intent>,
    /// Node replaced by an intent-set create, removed wherever it now lives.
    pub deleted_id: Option<NodeId>,
}

/// A single mutation of the storage tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Create(CreateOp),
    /// Moves a list child to a new position.
    SetParentKey {
        op_id: Option<OpId>,
        id: NodeId,
        parent_key: String,
    },
    /// Deletes a node and all of its descendants.
    Delete { op_id: Option<OpId>, id: NodeId },
    /// Sets plain properties on an object.
    UpdateObject {
        op_id: Option<OpId>,
        id: NodeId,
        data: JsonMap<String, Json>,
    },
    /// Removes a property from an object.
    DeleteObjectKey {
        op_id: Option<OpId>,
        id: NodeId,
        key: String,
    },
}

impl Op {
    /// The node this op targets (the created node for creates).
    pub fn id(&self) -> &NodeId {
        match self {
            Op::Create(create) => &create.id,
            Op::SetParentKey { id, .. }
            | Op::Delete { id, .. }
            | Op::UpdateObject { id, .. }
            | Op::DeleteObjectKey { id, .. } => id,
        }
    }

    pub fn op_id(&self) -> Option<&OpId> {
        match self {
            Op::Create(create) => create.op_id.as_ref(),
            Op::SetParentKey { op_id, .. }
            | Op::Delete { op_id, .. }
            | Op::UpdateObject { op_id, .. }
            | Op::DeleteObjectKey { op_id, .. } => op_id.as_ref(),
        }
    }

    pub fn set_op_id(&mut self, new_id: OpId) {
        let slot = match self {
            Op::Create(create) => &mut create.op_id,
            Op::SetParentKey { op_id, .. }
            | Op::Delete { op_id, .. }
            | Op::UpdateObject { op_id, .. }
            | Op::DeleteObjectKey { op_id, .. } => op_id,
        };
        *slot = Some(new_id);
    }

    /// Returns the op with the given op id attached.
    pub fn with_op_id(mut self, op_id: OpId) -> Self {
        self.set_op_id(op_id);
        self
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            Op::Create(create) => create.kind.op_code(),
            Op::SetParentKey { .. } => OpCode::SetParentKey,
            Op::Delete { .. } => OpCode::DeleteCrdt,
            Op::UpdateObject { .. } => OpCode::UpdateObject,
            Op::DeleteObjectKey { .. } => OpCode::DeleteObjectKey,
        }
    }

    pub fn as_create(&self) -> Option<&CreateOp> {
        match self {
            Op::Create(create) => Some(create),
            _ => None,
        }
    }

    /// Shorthand for a delete op without an op id.
    pub fn delete(id: NodeId) -> Self {
        Op::Delete { op_id: None, id }
    }

    /// Shorthand for a move op without an op id.
    pub fn set_parent_key(id: NodeId, parent_key: impl Into<String>) -> Self {
        Op::SetParentKey {
            op_id: None,
            id,
            parent_key: parent_key.into(),
        }
    }
}

impl From<CreateOp> for Op {
    fn from(create: CreateOp) -> Self {
        Op::Create(create)
    }
}
