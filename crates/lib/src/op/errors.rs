//! Error types for decoding operations and storage snapshots from the wire.

use thiserror::Error;

/// Errors raised while decoding wire-format operations.
///
/// These surface at the transport boundary; a batch containing an undecodable
/// op is rejected as a whole before anything reaches the tree.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OpError {
    /// The numeric op code is not one this engine knows
    #[error("Unknown op code: {code}")]
    UnknownOpCode { code: u64 },

    /// The numeric node type is not one this engine knows
    #[error("Unknown node type: {code}")]
    UnknownNodeType { code: u64 },

    /// A field required by this op code was absent
    #[error("Op {op} is missing required field '{field}'")]
    MissingField {
        op: &'static str,
        field: &'static str,
    },

    /// A field was present but had the wrong shape
    #[error("Op {op} has invalid field '{field}': {reason}")]
    InvalidField {
        op: &'static str,
        field: &'static str,
        reason: String,
    },

    /// The op code is valid on the wire but carries no storage semantics
    #[error("Op {op} is not a storage operation")]
    UnsupportedOp { op: &'static str },
}

impl OpError {
    /// Check if this error came from an unrecognised code
    pub fn is_unknown_code(&self) -> bool {
        matches!(
            self,
            OpError::UnknownOpCode { .. } | OpError::UnknownNodeType { .. }
        )
    }

    /// Get the field name if this error concerns a specific field
    pub fn field(&self) -> Option<&'static str> {
        match self {
            OpError::MissingField { field, .. } | OpError::InvalidField { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }
}

// Conversion from OpError to the main Error type
impl From<OpError> for crate::Error {
    fn from(err: OpError) -> Self {
        crate::Error::Op(err)
    }
}
