//! The replicated storage tree.
//!
//! Storage is a tree of nodes rooted at an object with the id `"root"`. Four
//! node kinds exist:
//!
//! - objects: string keys to plain JSON or child nodes, last writer wins per key
//! - lists: children ordered by fractional [`Position`](crate::position::Position)
//! - maps: string keys to child nodes, last writer wins per key
//! - registers: an immutable JSON value, used for plain values inside lists and maps
//!
//! All nodes live in a [`Pool`] arena keyed by [`NodeId`]. Mutations are
//! expressed as [`Op`](crate::op::Op)s and applied through [`Pool::apply`];
//! the server's total order of ops is what makes all replicas converge.

mod apply;
pub mod errors;
pub mod id;
pub mod immutable;
mod list;
mod map;
pub mod node;
mod object;
pub mod pool;
pub mod update;
pub mod value;

pub use errors::StorageError;
pub use id::{IdGenerator, NodeId, OpId};
pub use immutable::Immutable;
pub use node::{Node, NodeKind, ParentLink};
pub use pool::{ApplyResult, OpSource, Pool};
pub use update::{KeyChange, ListChange, StorageUpdate, UpdateKind, UpdateSet};
pub use value::LiveValue;
