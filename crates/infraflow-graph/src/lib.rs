//! InfraFlow Graph
//!
//! Builds the "must exist before" graph over managed resources and answers
//! ordering questions about it: deployment order, parallel levels, cycles,
//! reachability. The graph is an index-addressable adjacency structure built
//! fresh from a resource snapshot, so it never holds references into the
//! state store.
//!
//! ```
//! use infraflow_graph::DependencyGraph;
//! use infraflow_state::ResourceState;
//!
//! let resources = vec![
//!     ResourceState::new("vpc-1", "vpc"),
//!     ResourceState::new("subnet-1", "subnet").with_dependency("vpc-1"),
//! ];
//! let graph = DependencyGraph::build(&resources);
//! assert_eq!(graph.topological_order().unwrap(), vec!["vpc-1", "subnet-1"]);
//! ```

pub mod analysis;
pub mod error;
pub mod graph;
pub mod implicit;

pub use analysis::{Bottleneck, DEFAULT_BOTTLENECK_THRESHOLD, GraphComplexity, ImpactLevel};
pub use error::{GraphError, Result};
pub use graph::{DanglingEdge, DependencyGraph, GraphBuilder, GraphNode};
pub use implicit::ImplicitRules;
