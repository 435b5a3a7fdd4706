//! Error types for storage tree operations.
//!
//! This module defines structured error types for failures that can occur while
//! mutating or reading the node tree: permission failures on read-only sessions,
//! structural corruption, references to missing nodes, and bounds/type checks.

use thiserror::Error;

use super::NodeId;

/// Structured error types for storage tree operations.
///
/// Remote operations never surface these errors: an operation that references a
/// missing node is dropped with a warning instead. These variants are returned
/// from the synchronous local API.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    /// A mutation was attempted on a read-only session
    #[error("Cannot {operation}: storage is read-only for this session")]
    ReadOnly { operation: String },

    /// The tree is in an inconsistent state (missing parent link, dangling id).
    ///
    /// This indicates a bug in the engine rather than bad input.
    #[error("Storage structure is corrupt: {reason}")]
    Structural { reason: String },

    /// The referenced node does not exist in the tree
    #[error("Unknown node: {id}")]
    UnknownNode { id: NodeId },

    /// A list index was outside the valid range
    #[error("Index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The node exists but is not of the kind the operation requires
    #[error("Node {id} is a {actual}, expected {expected}")]
    TypeMismatch {
        id: NodeId,
        expected: &'static str,
        actual: &'static str,
    },

    /// A key was not present in an object or map
    #[error("Key not found in {id}: {key}")]
    KeyNotFound { id: NodeId, key: String },

    /// Undo/redo was requested while a batch is open
    #[error("Cannot {operation} while a batch is in progress")]
    HistoryDuringBatch { operation: &'static str },
}

impl StorageError {
    /// Check if this error was caused by a read-only session
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StorageError::ReadOnly { .. })
    }

    /// Check if this error indicates a node or key was not found
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::UnknownNode { .. } | StorageError::KeyNotFound { .. }
        )
    }

    /// Check if this error is an input validation failure
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            StorageError::IndexOutOfBounds { .. }
                | StorageError::TypeMismatch { .. }
                | StorageError::HistoryDuringBatch { .. }
        )
    }

    /// Check if this error indicates an internal structural problem
    pub fn is_structural_error(&self) -> bool {
        matches!(self, StorageError::Structural { .. })
    }

    /// Get the node id this error refers to, if any
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            StorageError::UnknownNode { id }
            | StorageError::TypeMismatch { id, .. }
            | StorageError::KeyNotFound { id, .. } => Some(id),
            _ => None,
        }
    }
}

// Conversion from StorageError to the main Error type
impl From<StorageError> for crate::Error {
    fn from(err: StorageError) -> Self {
        crate::Error::Storage(err)
    }
}
