//! State store error types

use thiserror::Error;

/// Resource state errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    DuplicateId(String),

    #[error("Resource {0} cannot depend on itself")]
    SelfDependency(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Invalid severity policy: {0}")]
    InvalidPolicy(String),

    #[error("State file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("State storage error: {0}")]
    Storage(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StateError {
    /// Whether this error came from the backing store rather than caller input.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StateError::Storage(_)
                | StateError::Lock(_)
                | StateError::Io(_)
                | StateError::Json(_)
                | StateError::UnsupportedVersion { .. }
        )
    }

    /// Storage failures may be retried; input errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StateError::Storage(_) | StateError::Lock(_) | StateError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_are_not_retryable() {
        assert!(!StateError::NotFound("vpc-1".into()).is_retryable());
        assert!(!StateError::DuplicateId("vpc-1".into()).is_storage_failure());
        assert!(!StateError::SelfDependency("vpc-1".into()).is_retryable());
    }

    #[test]
    fn test_io_error_is_retryable_storage_failure() {
        let err = StateError::from(std::io::Error::other("disk full"));
        assert!(err.is_storage_failure());
        assert!(err.is_retryable());
    }
}
