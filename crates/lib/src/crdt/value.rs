//! Values written through the local API.
//!
//! A [`LiveValue`] describes content to store: plain JSON, or a tree of new
//! container nodes. Writing one expands it into create ops.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as Json};

use super::{IdGenerator, NodeId};
use crate::{
    op::{CreateKind, CreateOp, Op},
    position::Position,
};

#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    /// Plain JSON. Stored inline on objects, as a register elsewhere.
    Json(Json),
    Object(BTreeMap<String, LiveValue>),
    List(Vec<LiveValue>),
    Map(BTreeMap<String, LiveValue>),
}

impl LiveValue {
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<LiveValue>,
    {
        LiveValue::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list<V: Into<LiveValue>>(items: impl IntoIterator<Item = V>) -> Self {
        LiveValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<LiveValue>,
    {
        LiveValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// True for values that become nodes even on an object.
    pub fn is_node(&self) -> bool {
        !matches!(self, LiveValue::Json(_))
    }

    /// Appends the create ops that build this value under `parent_id` at
    /// `parent_key`, parents before children, and returns the new node id.
    pub(crate) fn to_create_ops(
        &self,
        ids: &mut IdGenerator,
        parent_id: &NodeId,
        parent_key: &str,
        ops: &mut Vec<Op>,
    ) -> NodeId {
        let id = ids.next_node_id();
        let kind = match self {
            LiveValue::Json(value) => CreateKind::Register(value.clone()),
            LiveValue::Object(entries) => CreateKind::Object(
                entries
                    .iter()
                    .filter_map(|(k, v)| match v {
                        LiveValue::Json(value) => Some((k.clone(), value.clone())),
                        _ => None,
                    })
                    .collect::<JsonMap<_, _>>(),
            ),
            LiveValue::List(_) => CreateKind::List,
            LiveValue::Map(_) => CreateKind::Map,
        };
        ops.push(Op::Create(CreateOp {
            op_id: None,
            id: id.clone(),
            parent_id: parent_id.clone(),
            parent_key: parent_key.to_string(),
            kind,
            intent: None,
            deleted_id: None,
        }));

        match self {
            LiveValue::Json(_) => {}
            LiveValue::Object(entries) => {
                for (key, value) in entries.iter().filter(|(_, v)| v.is_node()) {
                    value.to_create_ops(ids, &id, key, ops);
                }
            }
            LiveValue::List(items) => {
                let mut position: Option<Position> = None;
                for item in items {
                    let next = position.as_ref().map_or_else(Position::first, Position::after);
                    item.to_create_ops(ids, &id, next.as_str(), ops);
                    position = Some(next);
                }
            }
            LiveValue::Map(entries) => {
                for (key, value) in entries {
                    value.to_create_ops(ids, &id, key, ops);
                }
            }
        }
        id
    }
}

impl From<Json> for LiveValue {
    fn from(value: Json) -> Self {
        LiveValue::Json(value)
    }
}

impl From<&str> for LiveValue {
    fn from(value: &str) -> Self {
        LiveValue::Json(Json::from(value))
    }
}

impl From<String> for LiveValue {
    fn from(value: String) -> Self {
        LiveValue::Json(Json::from(value))
    }
}

macro_rules! json_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for LiveValue {
                fn from(value: $ty) -> Self {
                    LiveValue::Json(Json::from(value))
                }
            }
        )*
    };
}

json_scalar!(i32, i64, u32, u64, usize, f64, bool);
