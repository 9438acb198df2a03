//! Engine error types

use infraflow_config::ConfigError;
use infraflow_conflict::ConflictError;
use infraflow_discovery::DiscoveryError;
use infraflow_graph::GraphError;
use infraflow_state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Discovery(DiscoveryError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Live resource not found: {0}")]
    UnknownLiveResource(String),

    #[error("Resource is already managed: {0}")]
    AlreadyManaged(String),

    #[error("Reconciliation cancelled")]
    Cancelled,
}

impl From<DiscoveryError> for EngineError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Cancelled => EngineError::Cancelled,
            other => EngineError::Discovery(other),
        }
    }
}

impl EngineError {
    /// Storage failures and lister failures may succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::State(e) => e.is_retryable(),
            EngineError::Discovery(DiscoveryError::Lister { .. }) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
