//! One reconciliation cycle
//!
//! [`Reconciler::run`] reads a snapshot of the store, scans the live
//! environment, pairs the two, and derives the deployment plan, drift and
//! conflicts from the result. It never writes to the store. Writing is
//! explicit: [`Reconciler::apply_resolutions`] persists accepted remedies and
//! [`Reconciler::adopt`] imports unmanaged live resources.

use crate::error::{EngineError, Result};
use crate::setup;
use infraflow_config::Config;
use infraflow_conflict::{Conflict, ConflictResolver, ResolutionAction};
use infraflow_discovery::{
    CorrelationReport, Correlator, DiscoveredResource, LiveResourceLister, ScanFailure, ScanOutcome,
    Scanner,
};
use infraflow_graph::{DanglingEdge, DependencyGraph, GraphBuilder, ImplicitRules};
use infraflow_state::{
    ChangeDetection, ResourceState, ResourceStatus, ResourceUpdate, StateError, StateStore, normalize_type,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deployment plan over managed and unmanaged resources
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentPlan {
    /// Empty when the graph is cyclic
    pub order: Vec<String>,
    pub levels: Vec<Vec<String>>,
    pub cycles: Vec<Vec<String>>,
    pub dangling: Vec<DanglingEdge>,
}

impl DeploymentPlan {
    pub fn is_deployable(&self) -> bool {
        self.cycles.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub managed: usize,
    pub discovered: usize,
    pub scan_failures: Vec<ScanFailure>,
    /// `missing` holds only records whose type was listed successfully
    pub correlation: CorrelationReport,
    /// Unmatched records whose type could not be listed
    pub unverified: Vec<String>,
    pub plan: DeploymentPlan,
    pub drift: Vec<ChangeDetection>,
    pub conflicts: Vec<Conflict>,
    /// Why automatic resolution left a conflict alone
    pub unresolved: Vec<String>,
}

impl ReconcileReport {
    pub fn has_drift(&self) -> bool {
        !self.drift.is_empty()
    }

    /// Nothing needs attention
    pub fn is_clean(&self) -> bool {
        self.scan_failures.is_empty()
            && self.correlation.missing.is_empty()
            && self.correlation.ambiguous.is_empty()
            && self.unverified.is_empty()
            && self.plan.is_deployable()
            && self.plan.dangling.is_empty()
            && self.drift.is_empty()
            && self.conflicts.iter().all(Conflict::is_resolved)
    }
}

/// Outcome of writing remedies back to the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    /// Resource IDs changed in the store
    pub applied: Vec<String>,
    /// Resource IDs the store does not manage
    pub skipped: Vec<String>,
    /// Conflicts without a resolution
    pub unresolved: usize,
    pub saved: bool,
}

pub struct Reconciler {
    store: Arc<StateStore>,
    lister: Arc<dyn LiveResourceLister>,
    correlator: Correlator,
    resolver: ConflictResolver,
    implicit: Option<ImplicitRules>,
    resource_types: Vec<String>,
    auto_resolve: bool,
}

impl Reconciler {
    pub fn new(store: Arc<StateStore>, lister: Arc<dyn LiveResourceLister>) -> Self {
        Self {
            store,
            lister,
            correlator: Correlator::new(),
            resolver: ConflictResolver::new(),
            implicit: Some(ImplicitRules::aws_defaults()),
            resource_types: Vec::new(),
            auto_resolve: false,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<StateStore>,
        lister: Arc<dyn LiveResourceLister>,
    ) -> Self {
        Self::new(store, lister)
            .with_correlator(setup::correlator(&config.discovery))
            .with_resolver(setup::conflict_resolver(&config.conflict))
            .with_implicit_rules(
                config
                    .engine
                    .implicit_dependencies
                    .then(ImplicitRules::aws_defaults),
            )
            .with_resource_types(config.discovery.resource_types.iter().cloned())
            .auto_resolve(config.engine.auto_resolve_conflicts)
    }

    pub fn with_correlator(mut self, correlator: Correlator) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// `None` disables implicit dependency edges
    pub fn with_implicit_rules(mut self, rules: Option<ImplicitRules>) -> Self {
        self.implicit = rules;
        self
    }

    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn auto_resolve(mut self, enabled: bool) -> Self {
        self.auto_resolve = enabled;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    fn graph_builder(&self) -> GraphBuilder {
        match &self.implicit {
            Some(rules) => GraphBuilder::new().implicit_rules(rules.clone()),
            None => GraphBuilder::new(),
        }
    }

    /// Graph over the managed resources only
    pub fn managed_graph(&self) -> DependencyGraph {
        self.graph_builder().build(&self.store.snapshot())
    }

    async fn scan(&self, cancel: &CancellationToken) -> Result<ScanOutcome> {
        let scanner =
            Scanner::new(Arc::clone(&self.lister)).with_resource_types(self.resource_types.iter().cloned());
        Ok(scanner.scan(cancel).await?)
    }

    /// Execute one cycle. Cycles in the graph are reported in the plan
    /// rather than failing the run.
    #[tracing::instrument(skip_all, fields(lister = self.lister.name()))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        let managed = self.store.snapshot();
        let outcome = self.scan(cancel).await?;

        let mut correlation = self.correlator.correlate(&managed, &outcome.resources, cancel)?;
        let unverified = split_unverified(&mut correlation, &managed, &outcome);

        let managed_ids: HashSet<&str> = managed.iter().map(|r| r.id.as_str()).collect();
        let mut resources = managed.clone();
        for live in &correlation.unmanaged {
            if managed_ids.contains(live.id.as_str()) {
                debug!(resource_id = %live.id, "Unmanaged resource shares a managed ID, left out of the graph");
                continue;
            }
            resources.push(live.to_resource_state());
        }

        let graph = self.graph_builder().build(&resources);
        let plan = deployment_plan(&graph);
        if !plan.is_deployable() {
            warn!(cycles = plan.cycles.len(), "Dependency graph is cyclic, no deployment order");
        }

        let mut drift = Vec::new();
        for (pairing, live) in correlation.matched() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match self.store.detect_drift(&live.properties, &pairing.managed_id) {
                Ok(Some(detection)) => drift.push(detection),
                Ok(None) => {}
                Err(StateError::NotFound(id)) => {
                    debug!(resource_id = %id, "Resource removed during reconciliation");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut conflicts = self.resolver.detect_conflicts_in(&resources, &graph);
        let unresolved = if self.auto_resolve {
            self.resolver
                .auto_resolve_conflicts(&mut conflicts)
                .into_iter()
                .map(|e| e.to_string())
                .collect()
        } else {
            Vec::new()
        };

        let report = ReconcileReport {
            managed: managed.len(),
            discovered: outcome.resources.len(),
            scan_failures: outcome.failures,
            correlation,
            unverified,
            plan,
            drift,
            conflicts,
            unresolved,
        };
        info!(
            managed = report.managed,
            discovered = report.discovered,
            matched = report.correlation.matched().count(),
            missing = report.correlation.missing.len(),
            unmanaged = report.correlation.unmanaged.len(),
            ambiguous = report.correlation.ambiguous.len(),
            drifted = report.drift.len(),
            conflicts = report.conflicts.len(),
            "Reconciliation completed"
        );
        Ok(report)
    }

    /// Write every resolved conflict's action into the store, then save
    /// when the store is file-backed.
    #[tracing::instrument(skip_all, fields(conflicts = conflicts.len()))]
    pub async fn apply_resolutions(&self, conflicts: &[Conflict]) -> Result<ApplySummary> {
        let mut applied = BTreeSet::new();
        let mut skipped = BTreeSet::new();
        let mut unresolved = 0;

        for conflict in conflicts {
            let Some(resolution) = &conflict.resolution else {
                unresolved += 1;
                continue;
            };

            let mut touched = Vec::new();
            match &resolution.action {
                ResolutionAction::DropDependency { dependency_id } => {
                    if self.store.contains(&conflict.resource_id) {
                        self.store.remove_dependency(&conflict.resource_id, dependency_id)?;
                        touched.push(conflict.resource_id.clone());
                    } else {
                        skipped.insert(conflict.resource_id.clone());
                    }
                }
                ResolutionAction::Rename { renames } => {
                    for (id, name) in renames {
                        if self.store.contains(id) {
                            self.store.rename(id, name.clone())?;
                            touched.push(id.clone());
                        } else {
                            skipped.insert(id.clone());
                        }
                    }
                }
                ResolutionAction::SetProperty { property, value } => {
                    if self.store.contains(&conflict.resource_id) {
                        self.store.update_resource(
                            &conflict.resource_id,
                            ResourceUpdate::new().property(property.clone(), value.clone()),
                        )?;
                        touched.push(conflict.resource_id.clone());
                    } else {
                        skipped.insert(conflict.resource_id.clone());
                    }
                }
            }

            if resolution.redeploy {
                for id in &touched {
                    self.store.set_status(id, ResourceStatus::Updating)?;
                }
            }
            debug!(
                resource_id = %conflict.resource_id,
                action = %resolution.action,
                "Resolution applied"
            );
            applied.extend(touched);
        }

        let saved = self.persist(!applied.is_empty()).await?;
        info!(
            applied = applied.len(),
            skipped = skipped.len(),
            unresolved,
            saved,
            "Resolutions applied"
        );
        Ok(ApplySummary {
            applied: applied.into_iter().collect(),
            skipped: skipped.into_iter().collect(),
            unresolved,
            saved,
        })
    }

    /// Scan, then import the named unmanaged resources
    pub async fn adopt<S: AsRef<str>>(
        &self,
        ids: &[S],
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceState>> {
        let outcome = self.scan(cancel).await?;
        self.adopt_discovered(ids, &outcome.resources).await
    }

    /// Import the named resources from an already scanned live set. Every ID
    /// is validated before any is added.
    #[tracing::instrument(skip_all, fields(count = ids.len()))]
    pub async fn adopt_discovered<S: AsRef<str>>(
        &self,
        ids: &[S],
        discovered: &[DiscoveredResource],
    ) -> Result<Vec<ResourceState>> {
        let mut adopted = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.as_ref();
            if self.store.contains(id) {
                return Err(EngineError::AlreadyManaged(id.to_string()));
            }
            let live = discovered
                .iter()
                .find(|r| r.id == id)
                .ok_or_else(|| EngineError::UnknownLiveResource(id.to_string()))?;
            adopted.push(live.to_resource_state());
        }

        for resource in &adopted {
            self.store.add_resource(resource.clone())?;
            info!(resource_id = %resource.id, resource_type = %resource.resource_type, "Resource adopted");
        }
        self.persist(!adopted.is_empty()).await?;
        Ok(adopted)
    }

    async fn persist(&self, changed: bool) -> Result<bool> {
        if !changed || self.store.file().is_none() {
            return Ok(false);
        }
        self.store.save_state().await?;
        Ok(true)
    }
}

/// Move missing records whose type failed to list out of `missing`
fn split_unverified(
    correlation: &mut CorrelationReport,
    managed: &[ResourceState],
    outcome: &ScanOutcome,
) -> Vec<String> {
    if outcome.is_complete() {
        return Vec::new();
    }
    let failed = outcome.failed_types();
    let all_failed = failed.contains(&None);
    let failed: HashSet<String> = failed.into_iter().flatten().map(normalize_type).collect();
    let unverified_type = |id: &str| {
        all_failed
            || managed
                .iter()
                .find(|r| r.id == id)
                .is_some_and(|r| failed.contains(&normalize_type(&r.resource_type)))
    };

    let (unverified, missing): (Vec<String>, Vec<String>) = correlation
        .missing
        .drain(..)
        .partition(|id| unverified_type(id.as_str()));
    correlation.missing = missing;
    if !unverified.is_empty() {
        warn!(
            count = unverified.len(),
            "Resources unverified because their listing failed"
        );
    }
    unverified
}

fn deployment_plan(graph: &DependencyGraph) -> DeploymentPlan {
    let cycles = graph.detect_cycles();
    let (order, levels) = if cycles.is_empty() {
        (
            graph.topological_order().unwrap_or_default(),
            graph.deployment_levels().unwrap_or_default(),
        )
    } else {
        (Vec::new(), Vec::new())
    };
    DeploymentPlan {
        order,
        levels,
        cycles,
        dangling: graph.dangling_edges().to_vec(),
    }
}
