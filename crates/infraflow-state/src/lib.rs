//! InfraFlow State
//!
//! This crate owns the record of every resource InfraFlow manages: its
//! properties, declared dependencies and lifecycle status, plus the on-disk
//! document those records are persisted to.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              infraflow-engine                    │
//! │            (reconciliation cycle)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               infraflow-state                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │     StateStore (RwLock<InfraState>)       │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │  StateFile   │  │DriftDetector │            │
//! │  └──────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod drift;
pub mod error;
pub mod file;
pub mod model;
pub mod store;

// Re-exports
pub use drift::{
    ChangeDetection, ChangeKind, DriftDetector, FieldChange, FieldPatternPolicy, Severity,
    SeverityPolicy,
};
pub use error::{Result, StateError};
pub use file::{DEFAULT_STATE_PATH, StateFile, StateLock};
pub use model::{
    InfrastructureState, Properties, ResourceState, ResourceStatus, ResourceUpdate, STATE_VERSION,
    normalize_type,
};
pub use store::StateStore;
