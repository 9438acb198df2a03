//! Discovery error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// More than one live resource scored best for a managed resource
    #[error("Ambiguous correlation for {resource_id}: candidates {}", .candidates.join(", "))]
    Ambiguous {
        resource_id: String,
        candidates: Vec<String>,
    },

    #[error("Lister '{lister}' failed: {message}")]
    Lister { lister: String, message: String },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Discovery cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiscoveryError {
    pub fn lister(lister: impl Into<String>, message: impl Into<String>) -> Self {
        DiscoveryError::Lister {
            lister: lister.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
