//! Conflict checks
//!
//! Every check is an independent [`ConflictCheck`] registered with the
//! resolver under its own tag. Checks are pure: they read the resource set
//! and the graph built from it and return conflicts with no resolution.

use crate::model::{Conflict, ConflictType};
use crate::rules::{CidrOverlapPolicy, OverlapPolicy};
use infraflow_graph::DependencyGraph;
use infraflow_state::{ResourceState, normalize_type};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Input shared by every check in one detection run
pub struct CheckContext<'a> {
    /// Sorted by ID
    pub resources: &'a [ResourceState],
    pub graph: &'a DependencyGraph,
}

pub trait ConflictCheck: Send + Sync {
    /// Registry tag
    fn tag(&self) -> &str;
    fn conflict_type(&self) -> ConflictType;
    fn check(&self, ctx: &CheckContext<'_>) -> Vec<Conflict>;
}

/// Same type, same name
#[derive(Debug, Clone, Default)]
pub struct DuplicateNameCheck;

impl ConflictCheck for DuplicateNameCheck {
    fn tag(&self) -> &str {
        "duplicate-name"
    }

    fn conflict_type(&self) -> ConflictType {
        ConflictType::DuplicateName
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<Conflict> {
        let mut groups: BTreeMap<(String, &str), Vec<&ResourceState>> = BTreeMap::new();
        for resource in ctx.resources {
            if resource.name.trim().is_empty() {
                continue;
            }
            groups
                .entry((normalize_type(&resource.resource_type), resource.name.as_str()))
                .or_default()
                .push(resource);
        }

        groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|((resource_type, name), mut members)| {
                members.sort_by(|a, b| a.id.cmp(&b.id));
                let ids: Vec<String> = members.iter().map(|r| r.id.clone()).collect();
                Conflict::new(
                    ids[0].clone(),
                    ConflictType::DuplicateName,
                    format!(
                        "{} {} resources share the name '{}': {}",
                        ids.len(),
                        resource_type,
                        name,
                        ids.join(", ")
                    ),
                )
                .with_related(ids[1..].iter().cloned())
                .with_evidence("name", name)
                .with_evidence("resource_type", resource_type)
                .with_evidence("resource_ids", ids)
            })
            .collect()
    }
}

/// Declared dependencies the graph could not resolve
#[derive(Debug, Clone, Default)]
pub struct DanglingDependencyCheck;

impl ConflictCheck for DanglingDependencyCheck {
    fn tag(&self) -> &str {
        "dangling-dependency"
    }

    fn conflict_type(&self) -> ConflictType {
        ConflictType::DanglingDependency
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<Conflict> {
        ctx.graph
            .dangling_edges()
            .iter()
            .map(|edge| {
                Conflict::new(
                    edge.from.clone(),
                    ConflictType::DanglingDependency,
                    format!("{} depends on {}, which does not exist", edge.from, edge.to),
                )
                .with_related([edge.to.clone()])
                .with_evidence("missing_dependency", edge.to.clone())
            })
            .collect()
    }
}

/// Pairwise overlap through a pluggable [`OverlapPolicy`]
#[derive(Clone)]
pub struct RuleOverlapCheck {
    policy: Arc<dyn OverlapPolicy>,
}

impl Default for RuleOverlapCheck {
    fn default() -> Self {
        Self::new(CidrOverlapPolicy)
    }
}

impl RuleOverlapCheck {
    pub fn new(policy: impl OverlapPolicy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl ConflictCheck for RuleOverlapCheck {
    fn tag(&self) -> &str {
        "rule-overlap"
    }

    fn conflict_type(&self) -> ConflictType {
        ConflictType::RuleOverlap
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (i, a) in ctx.resources.iter().enumerate() {
            for b in &ctx.resources[i + 1..] {
                if let Some(overlap) = self.policy.overlap(a, b) {
                    let mut conflict =
                        Conflict::new(a.id.clone(), ConflictType::RuleOverlap, overlap.details)
                            .with_related([b.id.clone()]);
                    conflict.evidence = overlap.evidence;
                    conflicts.push(conflict);
                }
            }
        }
        conflicts
    }
}

/// Property names forming one set of capacity bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityBounds {
    pub min: String,
    pub max: String,
    pub desired: Option<String>,
}

impl CapacityBounds {
    pub fn new(min: &str, max: &str, desired: Option<&str>) -> Self {
        Self {
            min: min.to_string(),
            max: max.to_string(),
            desired: desired.map(String::from),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Static check of declared bounds: min <= desired <= max
#[derive(Debug, Clone)]
pub struct CapacityCheck {
    bounds: Vec<CapacityBounds>,
}

impl Default for CapacityCheck {
    fn default() -> Self {
        Self {
            bounds: vec![
                CapacityBounds::new("min_size", "max_size", Some("desired_capacity")),
                CapacityBounds::new("min_capacity", "max_capacity", Some("desired_capacity")),
                CapacityBounds::new("min_count", "max_count", Some("desired_count")),
                CapacityBounds::new("allocated_storage", "max_allocated_storage", None),
            ],
        }
    }
}

impl CapacityCheck {
    pub fn new(bounds: Vec<CapacityBounds>) -> Self {
        Self { bounds }
    }
}

impl ConflictCheck for CapacityCheck {
    fn tag(&self) -> &str {
        "capacity-violation"
    }

    fn conflict_type(&self) -> ConflictType {
        ConflictType::CapacityViolation
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for resource in ctx.resources {
            for bounds in &self.bounds {
                let number = |key: &str| resource.properties.get(key).and_then(as_number);
                let (Some(min), Some(max)) = (number(&bounds.min), number(&bounds.max)) else {
                    continue;
                };
                let desired = bounds
                    .desired
                    .as_deref()
                    .and_then(|key| number(key).map(|v| (key, v)));

                let details = if min > max {
                    format!("{} = {} exceeds {} = {}", bounds.min, min, bounds.max, max)
                } else if let Some((key, value)) = desired
                    && (value < min || value > max)
                {
                    format!("{} = {} lies outside [{}, {}]", key, value, min, max)
                } else {
                    continue;
                };

                let mut conflict = Conflict::new(
                    resource.id.clone(),
                    ConflictType::CapacityViolation,
                    details,
                )
                .with_evidence("min_key", bounds.min.clone())
                .with_evidence("max_key", bounds.max.clone())
                .with_evidence("min", json!(min))
                .with_evidence("max", json!(max));
                if let Some((key, value)) = desired {
                    conflict = conflict
                        .with_evidence("desired_key", key)
                        .with_evidence("desired", json!(value));
                }
                conflicts.push(conflict);
            }
        }
        conflicts
    }
}
