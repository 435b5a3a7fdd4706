//! Identifiers for nodes and operations.
//!
//! Both identifiers are opaque strings on the wire. Locally generated ids take
//! the form `"<connection>:<clock>"`, where the connection prefix is the
//! server-assigned connection id or, before one is known, a random placeholder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::position::PositionSeed;

/// Identifier of a node in the storage tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Id of the storage root.
    pub const ROOT: &'static str = "root";

    /// Creates a node id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id of the storage root.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Returns true if this is the root id.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier correlating a locally issued operation with its acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(String);

impl OpId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OpId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generates node ids, op ids and position seeds for one room connection.
///
/// The three clocks are independent: node ids advance once per created node,
/// op ids once per locally issued op, and the position clock once per
/// generated list position.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
    seed_base: u32,
    node_clock: u64,
    op_clock: u64,
    position_clock: u64,
}

impl IdGenerator {
    /// Creates a generator for a known connection id.
    pub fn for_connection(connection_id: u32) -> Self {
        Self {
            prefix: connection_id.to_string(),
            seed_base: connection_id,
            node_clock: 0,
            op_clock: 0,
            position_clock: 0,
        }
    }

    /// Creates a generator with a random placeholder prefix.
    ///
    /// Used for offline sessions that have not been assigned a connection id.
    pub fn placeholder() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let simple = uuid.simple().to_string();
        Self {
            prefix: format!("local-{}", &simple[..8]),
            // Offset into the upper half so placeholder seeds never equal small connection ids
            seed_base: (uuid.as_u128() as u32) | 0x8000_0000,
            node_clock: 0,
            op_clock: 0,
            position_clock: 0,
        }
    }

    /// Switches to a server-assigned connection id, keeping the clocks.
    pub fn set_connection_id(&mut self, connection_id: u32) {
        self.prefix = connection_id.to_string();
        self.seed_base = connection_id;
    }

    /// The prefix used for generated ids.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_node_id(&mut self) -> NodeId {
        let id = NodeId(format!("{}:{}", self.prefix, self.node_clock));
        self.node_clock += 1;
        id
    }

    pub fn next_op_id(&mut self) -> OpId {
        let id = OpId(format!("{}:{}", self.prefix, self.op_clock));
        self.op_clock += 1;
        id
    }

    pub fn next_position_seed(&mut self) -> PositionSeed {
        let seed = PositionSeed::new(self.seed_base, self.position_clock);
        self.position_clock += 1;
        seed
    }
}
