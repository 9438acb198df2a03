pub mod conflicts;
pub mod drift;
pub mod plan;
pub mod reconcile;
pub mod resource;
