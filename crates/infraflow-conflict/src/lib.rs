//! InfraFlow Conflict
//!
//! Detects semantic conflicts among resources (duplicate names, overlapping
//! network rules, dangling dependencies, inconsistent capacity bounds),
//! computes automatic remedies where one is safe, and estimates the blast
//! radius of the rest.

pub mod checks;
pub mod error;
pub mod model;
pub mod resolver;
pub mod rules;

pub use checks::{
    CapacityBounds, CapacityCheck, CheckContext, ConflictCheck, DanglingDependencyCheck,
    DuplicateNameCheck, RuleOverlapCheck,
};
pub use error::{ConflictError, Result};
pub use model::{Conflict, ConflictType, Resolution, ResolutionAction};
pub use resolver::{
    ClampCapacity, ConflictImpact, ConflictResolver, DEFAULT_STATEFUL_TYPES, DropDanglingDependency,
    Remedy, RenameDuplicates, RiskLevel,
};
pub use rules::{Cidr, CidrOverlapPolicy, NetworkRule, Overlap, OverlapPolicy, PortRange};
