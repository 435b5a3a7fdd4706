//! Immutable projections of the storage tree.
//!
//! A projection is cheap to clone: containers are behind [`Arc`], and the pool
//! caches the projection of every node until that node or one of its
//! descendants changes. Unchanged subtrees keep the same allocation across
//! mutations, which [`Immutable::ptr_eq`] exposes.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::{Map as JsonMap, Value as Json};

#[derive(Debug, Clone, PartialEq)]
pub enum Immutable {
    /// A plain JSON value (object property or register).
    Value(Json),
    Object(Arc<BTreeMap<String, Immutable>>),
    List(Arc<Vec<Immutable>>),
    Map(Arc<BTreeMap<String, Immutable>>),
}

impl Immutable {
    /// Converts the projection into a JSON document.
    ///
    /// Objects and maps both become JSON objects; lists become arrays.
    pub fn to_json(&self) -> Json {
        match self {
            Immutable::Value(value) => value.clone(),
            Immutable::Object(entries) | Immutable::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<_, _>>(),
            ),
            Immutable::List(items) => Json::Array(items.iter().map(Immutable::to_json).collect()),
        }
    }

    /// Entry of an object or map.
    pub fn get(&self, key: &str) -> Option<&Immutable> {
        match self {
            Immutable::Object(entries) | Immutable::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Item of a list.
    pub fn index(&self, index: usize) -> Option<&Immutable> {
        match self {
            Immutable::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Json> {
        match self {
            Immutable::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Immutable]> {
        match self {
            Immutable::List(items) => Some(items),
            _ => None,
        }
    }

    /// Number of entries for containers, `None` for plain values.
    pub fn len(&self) -> Option<usize> {
        match self {
            Immutable::Object(entries) | Immutable::Map(entries) => Some(entries.len()),
            Immutable::List(items) => Some(items.len()),
            Immutable::Value(_) => None,
        }
    }

    /// True when both projections share the same container allocation.
    pub fn ptr_eq(&self, other: &Immutable) -> bool {
        match (self, other) {
            (Immutable::Object(a), Immutable::Object(b)) | (Immutable::Map(a), Immutable::Map(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Immutable::List(a), Immutable::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&Immutable> for Json {
    fn from(value: &Immutable) -> Self {
        value.to_json()
    }
}

impl PartialEq<Json> for Immutable {
    fn eq(&self, other: &Json) -> bool {
        &self.to_json() == other
    }
}
