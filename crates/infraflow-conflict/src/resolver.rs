//! Conflict resolver
//!
//! Holds two registries: checks keyed by tag, run by
//! [`ConflictResolver::detect_conflicts`], and remedies keyed by conflict
//! type, used by [`ConflictResolver::resolve_conflict`]. A conflict type with
//! no registered remedy is unresolvable.

use crate::checks::{
    CapacityCheck, CheckContext, ConflictCheck, DanglingDependencyCheck, DuplicateNameCheck,
    RuleOverlapCheck,
};
use crate::error::{ConflictError, Result};
use crate::model::{Conflict, ConflictType, Resolution, ResolutionAction};
use infraflow_graph::DependencyGraph;
use infraflow_state::{ResourceState, normalize_type};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Computes the remedy for one conflict type
pub trait Remedy: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> Result<Resolution>;
}

impl<F> Remedy for F
where
    F: Fn(&Conflict) -> Result<Resolution> + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> Result<Resolution> {
        self(conflict)
    }
}

/// Drop the unresolved edge and flag the resource for redeployment
pub struct DropDanglingDependency;

impl Remedy for DropDanglingDependency {
    fn resolve(&self, conflict: &Conflict) -> Result<Resolution> {
        let missing = conflict
            .evidence_str("missing_dependency")
            .or_else(|| conflict.related_ids.first().map(String::as_str))
            .ok_or_else(|| {
                ConflictError::InvalidConflict(format!(
                    "dangling-dependency conflict on {} names no dependency",
                    conflict.resource_id
                ))
            })?;
        Ok(Resolution::new(
            ResolutionAction::DropDependency {
                dependency_id: missing.to_string(),
            },
            format!("{} no longer exists; the edge is removed", missing),
            0.8,
        )
        .with_redeploy())
    }
}

/// Keep the lexicographically smallest ID's name, suffix every other
pub struct RenameDuplicates;

impl RenameDuplicates {
    fn id_suffix(id: &str) -> String {
        let clean: Vec<char> = id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let start = clean.len().saturating_sub(8);
        clean[start..].iter().collect()
    }
}

impl Remedy for RenameDuplicates {
    fn resolve(&self, conflict: &Conflict) -> Result<Resolution> {
        let name = conflict.evidence_str("name").ok_or_else(|| {
            ConflictError::InvalidConflict(format!(
                "duplicate-name conflict on {} carries no name",
                conflict.resource_id
            ))
        })?;

        let ids: BTreeSet<&str> = conflict.involved_ids().collect();
        let mut renamed: Vec<&str> = ids.into_iter().skip(1).collect();
        renamed.sort_unstable();

        let mut renames: BTreeMap<String, String> = renamed
            .iter()
            .map(|id| (id.to_string(), format!("{}-{}", name, Self::id_suffix(id))))
            .collect();
        let distinct: HashSet<&String> = renames.values().collect();
        if distinct.len() < renames.len() || renames.values().any(|n| n == name) {
            // Suffixes collided; fall back to the whole ID
            for (id, new_name) in renames.iter_mut() {
                *new_name = format!("{}-{}", name, id);
            }
        }

        Ok(Resolution::new(
            ResolutionAction::Rename { renames },
            format!("'{}' is kept by the oldest-sorting resource; others are suffixed", name),
            0.9,
        )
        .with_redeploy())
    }
}

/// Clamp a desired value into valid bounds. Inverted bounds are left to a human.
pub struct ClampCapacity;

impl Remedy for ClampCapacity {
    fn resolve(&self, conflict: &Conflict) -> Result<Resolution> {
        let (Some(min), Some(max)) = (conflict.evidence_f64("min"), conflict.evidence_f64("max"))
        else {
            return Err(ConflictError::InvalidConflict(format!(
                "capacity-violation conflict on {} carries no bounds",
                conflict.resource_id
            )));
        };
        if min > max {
            return Err(ConflictError::unresolvable(
                &conflict.resource_id,
                ConflictType::CapacityViolation,
                format!("minimum {} exceeds maximum {}", min, max),
            ));
        }
        let (Some(key), Some(desired)) = (
            conflict.evidence_str("desired_key"),
            conflict.evidence_f64("desired"),
        ) else {
            return Err(ConflictError::unresolvable(
                &conflict.resource_id,
                ConflictType::CapacityViolation,
                "bounds are consistent but no desired value to adjust",
            ));
        };

        let clamped = desired.clamp(min, max);
        let value = if clamped.fract() == 0.0 && clamped.abs() < i64::MAX as f64 {
            json!(clamped as i64)
        } else {
            json!(clamped)
        };
        Ok(Resolution::new(
            ResolutionAction::SetProperty {
                property: key.to_string(),
                value,
            },
            format!("{} clamped from {} into [{}, {}]", key, desired, min, max),
            0.85,
        )
        .with_redeploy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn from_score(score: u32) -> Self {
        match score {
            s if s >= 80 => RiskLevel::Critical,
            s if s >= 50 => RiskLevel::High,
            s if s >= 20 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Downstream effect of changing or removing the conflicting resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictImpact {
    pub resource_id: String,
    /// Transitive dependents of every involved resource, sorted
    pub affected: Vec<String>,
    /// Stateful resources among the involved and affected ones
    pub stateful: Vec<String>,
    /// 0..=100
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

pub const DEFAULT_STATEFUL_TYPES: &[&str] = &[
    "db-instance",
    "db-cluster",
    "rds-instance",
    "dynamodb-table",
    "elasticache-cluster",
    "ebs-volume",
    "efs-file-system",
    "s3-bucket",
];

pub struct ConflictResolver {
    checks: BTreeMap<String, Arc<dyn ConflictCheck>>,
    remedies: HashMap<ConflictType, Arc<dyn Remedy>>,
    stateful_types: HashSet<String>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    /// Resolver with the built-in checks and remedies
    pub fn new() -> Self {
        Self::empty()
            .with_check(DuplicateNameCheck)
            .with_check(RuleOverlapCheck::default())
            .with_check(DanglingDependencyCheck)
            .with_check(CapacityCheck::default())
            .with_remedy(ConflictType::DanglingDependency, DropDanglingDependency)
            .with_remedy(ConflictType::DuplicateName, RenameDuplicates)
            .with_remedy(ConflictType::CapacityViolation, ClampCapacity)
            .with_stateful_types(DEFAULT_STATEFUL_TYPES.iter().copied())
    }

    /// Resolver with nothing registered
    pub fn empty() -> Self {
        Self {
            checks: BTreeMap::new(),
            remedies: HashMap::new(),
            stateful_types: HashSet::new(),
        }
    }

    /// Register a check; replaces any check with the same tag
    pub fn with_check(mut self, check: impl ConflictCheck + 'static) -> Self {
        self.checks.insert(check.tag().to_string(), Arc::new(check));
        self
    }

    pub fn without_check(mut self, tag: &str) -> Self {
        self.checks.remove(tag);
        self
    }

    pub fn with_remedy(mut self, conflict_type: ConflictType, remedy: impl Remedy + 'static) -> Self {
        self.remedies.insert(conflict_type, Arc::new(remedy));
        self
    }

    pub fn with_stateful_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stateful_types
            .extend(types.into_iter().map(|t| normalize_type(t.as_ref())));
        self
    }

    /// Forget every stateful type registered so far
    pub fn without_stateful_types(mut self) -> Self {
        self.stateful_types.clear();
        self
    }

    pub fn check_tags(&self) -> impl Iterator<Item = &str> {
        self.checks.keys().map(String::as_str)
    }

    pub fn is_auto_resolvable(&self, conflict_type: ConflictType) -> bool {
        self.remedies.contains_key(&conflict_type)
    }

    fn is_stateful(&self, resource_type: &str) -> bool {
        self.stateful_types.contains(&normalize_type(resource_type))
    }

    /// Run every registered check over `resources`, building the graph
    /// from their declared dependencies.
    pub fn detect_conflicts(&self, resources: &[ResourceState]) -> Vec<Conflict> {
        let mut sorted = resources.to_vec();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let graph = DependencyGraph::build(&sorted);
        self.detect_conflicts_in(&sorted, &graph)
    }

    /// Run every registered check against an already built graph. The
    /// result is sorted by conflict type, then resource ID.
    #[tracing::instrument(skip_all, fields(resources = resources.len()))]
    pub fn detect_conflicts_in(
        &self,
        resources: &[ResourceState],
        graph: &DependencyGraph,
    ) -> Vec<Conflict> {
        let mut sorted: Vec<ResourceState>;
        let resources = if resources.is_sorted_by(|a, b| a.id <= b.id) {
            resources
        } else {
            sorted = resources.to_vec();
            sorted.sort_by(|a, b| a.id.cmp(&b.id));
            &sorted
        };
        let ctx = CheckContext { resources, graph };

        let mut conflicts = Vec::new();
        for (tag, check) in &self.checks {
            let found = check.check(&ctx);
            if !found.is_empty() {
                debug!(check = %tag, count = found.len(), "Conflicts found");
            }
            conflicts.extend(found);
        }
        conflicts.sort_by(|a, b| {
            a.conflict_type
                .cmp(&b.conflict_type)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
                .then_with(|| a.related_ids.cmp(&b.related_ids))
        });

        info!(conflicts = conflicts.len(), "Conflict detection completed");
        conflicts
    }

    /// Fill in `conflict.resolution` with the type's remedy. On error the
    /// conflict is left untouched. An already resolved conflict is kept.
    pub fn resolve_conflict(&self, conflict: &mut Conflict) -> Result<()> {
        if conflict.is_resolved() {
            return Ok(());
        }
        let remedy = self.remedies.get(&conflict.conflict_type).ok_or_else(|| {
            ConflictError::unresolvable(
                &conflict.resource_id,
                conflict.conflict_type,
                format!("no automatic remedy for {}", conflict.conflict_type),
            )
        })?;
        let resolution = remedy.resolve(conflict)?;
        debug!(
            resource_id = %conflict.resource_id,
            conflict_type = %conflict.conflict_type,
            action = %resolution.action,
            confidence = resolution.confidence,
            "Conflict resolved"
        );
        conflict.resolution = Some(resolution);
        Ok(())
    }

    /// Resolve every conflict whose type has a remedy. Conflicts that cannot
    /// be resolved stay unchanged and their errors are returned.
    pub fn auto_resolve_conflicts(&self, conflicts: &mut [Conflict]) -> Vec<ConflictError> {
        let mut skipped = Vec::new();
        let mut resolved = 0;
        for conflict in conflicts.iter_mut() {
            if conflict.is_resolved() || !self.is_auto_resolvable(conflict.conflict_type) {
                continue;
            }
            match self.resolve_conflict(conflict) {
                Ok(()) => resolved += 1,
                Err(e) => {
                    warn!(resource_id = %conflict.resource_id, error = %e, "Conflict left for manual resolution");
                    skipped.push(e);
                }
            }
        }
        info!(
            resolved,
            skipped = skipped.len(),
            manual = conflicts.iter().filter(|c| !c.is_resolved()).count(),
            "Automatic conflict resolution completed"
        );
        skipped
    }

    /// Blast radius of modifying or removing the resources in `conflict`
    pub fn analyze_impact(&self, conflict: &Conflict, graph: &DependencyGraph) -> ConflictImpact {
        let involved: BTreeSet<&str> = conflict.involved_ids().collect();
        let mut affected = BTreeSet::new();
        for id in &involved {
            if let Ok(dependents) = graph.transitive_dependents(id) {
                affected.extend(dependents);
            }
        }
        for id in &involved {
            affected.remove(*id);
        }

        let stateful: Vec<String> = involved
            .iter()
            .map(|id| id.to_string())
            .chain(affected.iter().cloned())
            .filter(|id| {
                graph
                    .node(id)
                    .is_some_and(|node| self.is_stateful(&node.resource_type))
            })
            .collect();

        let score = (affected.len() as u32)
            .saturating_mul(10)
            .saturating_add((stateful.len() as u32).saturating_mul(25))
            .min(100);
        let risk_level = RiskLevel::from_score(score);

        let mut recommendations = Vec::new();
        match conflict.conflict_type {
            ConflictType::DuplicateName => recommendations
                .push("Give each resource a unique name before the next deployment".to_string()),
            ConflictType::RuleOverlap => recommendations.push(
                "Review the overlapping rules and make precedence explicit; no automatic fix is applied"
                    .to_string(),
            ),
            ConflictType::DanglingDependency => recommendations.push(
                "Recreate the missing dependency or drop the edge and redeploy".to_string(),
            ),
            ConflictType::CapacityViolation => recommendations
                .push("Correct the capacity bounds so that min <= desired <= max".to_string()),
            ConflictType::Other => recommendations.push("Inspect the conflict details manually".to_string()),
        }
        if !stateful.is_empty() {
            recommendations.push(format!(
                "Back up stateful resources before changing anything: {}",
                stateful.join(", ")
            ));
        }
        if !affected.is_empty() {
            recommendations.push(format!(
                "Plan a rollout for {} dependent resource(s) in deployment order",
                affected.len()
            ));
        }
        if risk_level >= RiskLevel::High {
            recommendations.push("Schedule a maintenance window".to_string());
        }

        ConflictImpact {
            resource_id: conflict.resource_id.clone(),
            affected: affected.into_iter().collect(),
            stateful,
            risk_score: score,
            risk_level,
            recommendations,
        }
    }
}
