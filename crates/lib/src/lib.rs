//!
//! Canopy: the replicated storage core of a real-time collaborative room.
//!
//! A room holds a tree of conflict-free nodes that every connected client
//! edits locally and synchronizes through a central server. The server
//! defines a total order over operations; each client applies its own edits
//! optimistically and reconciles when the server echoes them back.
//!
//! ## Core Concepts
//!
//! * **Nodes (`crdt::Node`)**: Objects, lists, maps and registers stored in a flat arena (`crdt::Pool`) keyed by id.
//! * **Operations (`op::Op`)**: Every mutation as a value, with a JSON wire form (`op::wire`) shared with the server.
//! * **Positions (`position::Position`)**: Dense fractional keys that order list children.
//! * **Rooms (`room::Room`)**: The local session: mutation API, pending ops, undo/redo, batching and subscriptions.
//! * **Snapshots (`snapshot`)**: Lazily recomputed, batch-notified immutable views of storage.
//! * **Transports (`transport::Transport`)**: Where a room sends its outgoing ops.

pub mod config;
pub mod crdt;
pub mod op;
pub mod position;
pub mod room;
pub mod snapshot;
pub mod transport;

pub use config::RoomConfig;
pub use crdt::{Immutable, LiveValue, NodeId, StorageUpdate};
pub use room::Room;

/// Result type used throughout the Canopy library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Canopy library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured storage errors from the crdt module
    #[error(transparent)]
    Storage(crdt::StorageError),

    /// Structured wire decoding errors from the op module
    #[error(transparent)]
    Op(op::OpError),

    /// Structured transport errors from the transport module
    #[error(transparent)]
    Transport(transport::TransportError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Storage(_) => "crdt",
            Error::Op(_) => "op",
            Error::Transport(_) => "transport",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a node or key was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Storage(storage_err) => storage_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates the session may not write.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Storage(storage_err) => storage_err.is_permission_denied(),
            _ => false,
        }
    }

    /// Check if this error is validation-related.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Storage(storage_err) => storage_err.is_validation_error(),
            Error::Op(_) => true,
            _ => false,
        }
    }

    /// Check if this error indicates corrupt storage structure.
    pub fn is_structural_error(&self) -> bool {
        match self {
            Error::Storage(storage_err) => storage_err.is_structural_error(),
            _ => false,
        }
    }

    /// Check if this error came from decoding wire data.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Error::Op(_) | Error::Serialize(_))
    }

    /// Check if this error is transport-related.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
