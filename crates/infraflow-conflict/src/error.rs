//! Conflict resolver error types

use crate::model::ConflictType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConflictError {
    /// No automatic remedy exists; a human has to decide
    #[error("Conflict {conflict_type} on {resource_id} needs manual resolution: {reason}")]
    Unresolvable {
        resource_id: String,
        conflict_type: ConflictType,
        reason: String,
    },

    #[error("Invalid conflict record: {0}")]
    InvalidConflict(String),
}

impl ConflictError {
    pub fn unresolvable(
        resource_id: impl Into<String>,
        conflict_type: ConflictType,
        reason: impl Into<String>,
    ) -> Self {
        ConflictError::Unresolvable {
            resource_id: resource_id.into(),
            conflict_type,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConflictError>;
