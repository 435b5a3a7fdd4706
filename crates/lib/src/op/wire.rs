//! JSON wire format for operations and storage snapshots.
//!
//! Wire shape of an op:
//!
//! ```text
//! { "type": OpCode, "id"?, "opId"?, "parentId"?, "parentKey"?,
//!   "data"?, "intent"?: "set", "deletedId"?, "key"? }
//! ```
//!
//! Op codes and node types are integers. A full storage snapshot is an array
//! of `[NodeId, SerializedNode]` pairs ordered so that every parent precedes
//! its children.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};

use super::{CreateKind, CreateOp, Intent, Op, OpError};
use crate::{
    Result,
    crdt::{NodeId, NodeKind, OpId},
};

/// Numeric op codes shared with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u8")]
#[repr(u8)]
pub enum OpCode {
    Init = 0,
    SetParentKey = 1,
    CreateList = 2,
    UpdateObject = 3,
    CreateObject = 4,
    DeleteCrdt = 5,
    DeleteObjectKey = 6,
    CreateMap = 7,
    CreateRegister = 8,
}

impl OpCode {
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Init => "INIT",
            OpCode::SetParentKey => "SET_PARENT_KEY",
            OpCode::CreateList => "CREATE_LIST",
            OpCode::UpdateObject => "UPDATE_OBJECT",
            OpCode::CreateObject => "CREATE_OBJECT",
            OpCode::DeleteCrdt => "DELETE_CRDT",
            OpCode::DeleteObjectKey => "DELETE_OBJECT_KEY",
            OpCode::CreateMap => "CREATE_MAP",
            OpCode::CreateRegister => "CREATE_REGISTER",
        }
    }
}

impl TryFrom<u64> for OpCode {
    type Error = OpError;

    fn try_from(code: u64) -> std::result::Result<Self, Self::Error> {
        Ok(match code {
            0 => OpCode::Init,
            1 => OpCode::SetParentKey,
            2 => OpCode::CreateList,
            3 => OpCode::UpdateObject,
            4 => OpCode::CreateObject,
            5 => OpCode::DeleteCrdt,
            6 => OpCode::DeleteObjectKey,
            7 => OpCode::CreateMap,
            8 => OpCode::CreateRegister,
            _ => return Err(OpError::UnknownOpCode { code }),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(code: OpCode) -> Self {
        code as u8
    }
}

/// An operation exactly as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOp {
    #[serde(rename = "type")]
    pub op_code: OpCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<OpId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl RawOp {
    fn empty(op_code: OpCode) -> Self {
        Self {
            op_code,
            id: None,
            op_id: None,
            parent_id: None,
            parent_key: None,
            data: None,
            intent: None,
            deleted_id: None,
            key: None,
        }
    }

    fn require<T>(value: Option<T>, op: OpCode, field: &'static str) -> std::result::Result<T, OpError> {
        value.ok_or(OpError::MissingField {
            op: op.name(),
            field,
        })
    }

    fn object_data(
        data: Option<Json>,
        op: OpCode,
    ) -> std::result::Result<JsonMap<String, Json>, OpError> {
        match data {
            None => Ok(JsonMap::new()),
            Some(Json::Object(map)) => Ok(map),
            Some(other) => Err(OpError::InvalidField {
                op: op.name(),
                field: "data",
                reason: format!("expected an object, found {other}"),
            }),
        }
    }
}

impl TryFrom<RawOp> for Op {
    type Error = OpError;

    fn try_from(raw: RawOp) -> std::result::Result<Self, Self::Error> {
        let code = raw.op_code;
        let op = match code {
            OpCode::Init => return Err(OpError::UnsupportedOp { op: code.name() }),
            OpCode::CreateObject
            | OpCode::CreateList
            | OpCode::CreateMap
            | OpCode::CreateRegister => {
                let kind = match code {
                    OpCode::CreateObject => CreateKind::Object(RawOp::object_data(raw.data, code)?),
                    OpCode::CreateList => CreateKind::List,
                    OpCode::CreateMap => CreateKind::Map,
                    _ => CreateKind::Register(RawOp::require(raw.data, code, "data")?),
                };
                let intent = match raw.intent.as_deref() {
                    None => None,
                    Some(value) if value == Intent::Set.as_str() => Some(Intent::Set),
                    Some(other) => {
                        return Err(OpError::InvalidField {
                            op: code.name(),
                            field: "intent",
                            reason: format!("unknown intent '{other}'"),
                        });
                    }
                };
                Op::Create(CreateOp {
                    op_id: raw.op_id,
                    id: RawOp::require(raw.id, code, "id")?,
                    parent_id: RawOp::require(raw.parent_id, code, "parentId")?,
                    parent_key: RawOp::require(raw.parent_key, code, "parentKey")?,
                    kind,
                    intent,
                    deleted_id: raw.deleted_id,
                })
            }
            OpCode::SetParentKey => Op::SetParentKey {
                op_id: raw.op_id,
                id: RawOp::require(raw.id, code, "id")?,
                parent_key: RawOp::require(raw.parent_key, code, "parentKey")?,
            },
            OpCode::DeleteCrdt => Op::Delete {
                op_id: raw.op_id,
                id: RawOp::require(raw.id, code, "id")?,
            },
            OpCode::UpdateObject => Op::UpdateObject {
                op_id: raw.op_id,
                id: RawOp::require(raw.id, code, "id")?,
                data: RawOp::object_data(Some(RawOp::require(raw.data, code, "data")?), code)?,
            },
            OpCode::DeleteObjectKey => Op::DeleteObjectKey {
                op_id: raw.op_id,
                id: RawOp::require(raw.id, code, "id")?,
                key: RawOp::require(raw.key, code, "key")?,
            },
        };
        Ok(op)
    }
}

impl From<&Op> for RawOp {
    fn from(op: &Op) -> Self {
        let mut raw = RawOp::empty(op.op_code());
        raw.id = Some(op.id().clone());
        raw.op_id = op.op_id().cloned();
        match op {
            Op::Create(create) => {
                raw.parent_id = Some(create.parent_id.clone());
                raw.parent_key = Some(create.parent_key.clone());
                raw.intent = create.intent.map(|intent| intent.as_str().to_string());
                raw.deleted_id = create.deleted_id.clone();
                raw.data = match &create.kind {
                    CreateKind::Object(data) => Some(Json::Object(data.clone())),
                    CreateKind::Register(data) => Some(data.clone()),
                    CreateKind::List | CreateKind::Map => None,
                };
            }
            Op::SetParentKey { parent_key, .. } => raw.parent_key = Some(parent_key.clone()),
            Op::Delete { .. } => {}
            Op::UpdateObject { data, .. } => raw.data = Some(Json::Object(data.clone())),
            Op::DeleteObjectKey { key, .. } => raw.key = Some(key.clone()),
        }
        raw
    }
}

impl From<Op> for RawOp {
    fn from(op: Op) -> Self {
        RawOp::from(&op)
    }
}

/// A node as it appears in a full storage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
}

impl SerializedNode {
    /// Parent id and key, if both are present.
    pub fn parent(&self) -> Option<(&NodeId, &str)> {
        match (&self.parent_id, &self.parent_key) {
            (Some(id), Some(key)) => Some((id, key.as_str())),
            _ => None,
        }
    }

    /// Plain object properties; empty for non-objects.
    pub fn object_data(&self) -> JsonMap<String, Json> {
        match &self.data {
            Some(Json::Object(map)) => map.clone(),
            _ => JsonMap::new(),
        }
    }
}

/// One entry of a full storage snapshot.
pub type StorageItem = (NodeId, SerializedNode);

/// Decodes a JSON array of wire ops.
pub fn decode_ops(json: &str) -> Result<Vec<Op>> {
    let raw: Vec<RawOp> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|raw| Op::try_from(raw).map_err(Into::into))
        .collect()
}

/// Encodes ops as a JSON array of wire ops.
pub fn encode_ops(ops: &[Op]) -> Result<String> {
    let raw: Vec<RawOp> = ops.iter().map(RawOp::from).collect();
    Ok(serde_json::to_string(&raw)?)
}

/// Decodes a full storage snapshot.
pub fn decode_snapshot(json: &str) -> Result<Vec<StorageItem>> {
    Ok(serde_json::from_str(json)?)
}

/// Encodes a full storage snapshot.
pub fn encode_snapshot(items: &[StorageItem]) -> Result<String> {
    Ok(serde_json::to_string(items)?)
}
