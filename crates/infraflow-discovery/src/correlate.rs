//! Discovery correlation
//!
//! Pairs managed resource records with live discovered resources. Matching
//! runs in passes of decreasing certainty:
//!
//! 1. exact ID, either the record ID itself or a provider ID stored in the
//!    record's properties
//! 2. the ownership tag or a per-type natural key (e.g. CIDR block within
//!    a region for a VPC)
//! 3. fuzzy name similarity among resources of the same type
//!
//! A pass only pairs a record with a live resource when the best score is
//! unique on both sides. Ties are reported as ambiguous and the record is
//! excluded from later passes, so drift and conflict checks never see a
//! guessed pairing.

use crate::error::{DiscoveryError, Result};
use crate::lister::DiscoveredResource;
use crate::naming::name_similarity;
use infraflow_state::{ResourceState, normalize_type};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tag a live resource carries when it was created for a managed record
pub const MANAGED_ID_TAG: &str = "infraflow:managed-id";

pub const DEFAULT_NAME_MATCH_THRESHOLD: f64 = 0.75;

const SCORE_EPSILON: f64 = 1e-9;

/// How a managed record was paired with its live counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchBasis {
    ExactId,
    TagMatch,
    NameMatch,
    Unmatched,
}

impl std::fmt::Display for MatchBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchBasis::ExactId => write!(f, "exact-id"),
            MatchBasis::TagMatch => write!(f, "tag-match"),
            MatchBasis::NameMatch => write!(f, "name-match"),
            MatchBasis::Unmatched => write!(f, "unmatched"),
        }
    }
}

/// Identifying properties of a resource type.
///
/// `fields` must be present on the managed record and equal on the live
/// resource. `scope` fields narrow the match and are compared only when
/// both sides carry them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NaturalKey {
    pub fields: Vec<String>,
    pub scope: Vec<String>,
}

impl NaturalKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            scope: Vec::new(),
        }
    }

    pub fn scoped<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    fn matches(&self, managed: &ResourceState, live: &DiscoveredResource) -> bool {
        if self.fields.is_empty() {
            return false;
        }
        fn present(v: Option<&Value>) -> Option<&Value> {
            v.filter(|v| !v.is_null())
        }
        let fields_equal = self.fields.iter().all(|f| {
            match (present(managed.properties.get(f)), present(live.properties.get(f))) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        });
        fields_equal
            && self.scope.iter().all(|f| {
                match (present(managed.properties.get(f)), present(live.properties.get(f))) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
            })
    }
}

/// Pairing of one managed record with at most one live resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceCorrelation {
    pub managed_id: String,
    pub discovered: Option<DiscoveredResource>,
    pub basis: MatchBasis,
    pub confidence: f64,
    /// Tied live candidates when no unique best match existed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl ResourceCorrelation {
    fn unmatched(managed_id: &str) -> Self {
        Self {
            managed_id: managed_id.to_string(),
            discovered: None,
            basis: MatchBasis::Unmatched,
            confidence: 0.0,
            candidates: Vec::new(),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.discovered.is_some()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.discovered.is_none() && !self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorrelationReport {
    /// Keyed by managed ID; every managed record has an entry
    pub correlations: BTreeMap<String, ResourceCorrelation>,
    /// Managed records with no live counterpart, possibly deleted out of band
    pub missing: Vec<String>,
    /// Live resources nothing claims, candidates for adoption
    pub unmanaged: Vec<DiscoveredResource>,
    /// Managed records with tied candidates
    pub ambiguous: Vec<String>,
}

impl CorrelationReport {
    /// Unambiguous pairs only
    pub fn matched(&self) -> impl Iterator<Item = (&ResourceCorrelation, &DiscoveredResource)> {
        self.correlations
            .values()
            .filter_map(|c| c.discovered.as_ref().map(|d| (c, d)))
    }

    pub fn get(&self, managed_id: &str) -> Option<&ResourceCorrelation> {
        self.correlations.get(managed_id)
    }

    pub fn ambiguity_errors(&self) -> Vec<DiscoveryError> {
        self.ambiguous
            .iter()
            .filter_map(|id| self.correlations.get(id))
            .map(|c| DiscoveryError::Ambiguous {
                resource_id: c.managed_id.clone(),
                candidates: c.candidates.clone(),
            })
            .collect()
    }

    /// Fails with the first ambiguous pairing, if any
    pub fn ensure_unambiguous(&self) -> Result<()> {
        match self.ambiguity_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Working state shared by the passes
struct Matching<'a> {
    managed: Vec<&'a ResourceState>,
    discovered: Vec<&'a DiscoveredResource>,
    /// managed index -> (discovered index, basis, score)
    paired: HashMap<usize, (usize, MatchBasis, f64)>,
    /// managed index -> tied discovered indices
    tied: HashMap<usize, Vec<usize>>,
    claimed: Vec<bool>,
}

impl Matching<'_> {
    fn open(&self, m: usize) -> bool {
        !self.paired.contains_key(&m) && !self.tied.contains_key(&m)
    }
}

#[derive(Debug, Clone)]
pub struct Correlator {
    provider_id_keys: HashMap<String, Vec<String>>,
    natural_keys: HashMap<String, NaturalKey>,
    name_threshold: f64,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Correlator with the common AWS provider ID keys and natural keys
    pub fn new() -> Self {
        let provider_id_keys = [
            ("vpc", &["vpc_id"][..]),
            ("subnet", &["subnet_id"]),
            ("security-group", &["group_id", "security_group_id"]),
            ("ec2-instance", &["instance_id"]),
            ("internet-gateway", &["internet_gateway_id"]),
            ("nat-gateway", &["nat_gateway_id"]),
            ("route-table", &["route_table_id"]),
            ("launch-template", &["launch_template_id"]),
            ("auto-scaling-group", &["auto_scaling_group_name"]),
            ("load-balancer", &["load_balancer_arn"]),
            ("target-group", &["target_group_arn"]),
            ("listener", &["listener_arn"]),
            ("db-instance", &["db_instance_identifier"]),
            ("db-subnet-group", &["db_subnet_group_name"]),
            ("key-pair", &["key_name"]),
            ("ami", &["image_id"]),
        ]
        .into_iter()
        .map(|(t, keys)| (t.to_string(), keys.iter().map(|k| k.to_string()).collect()))
        .collect();

        let natural_keys = [
            ("vpc", NaturalKey::new(["cidr_block"]).scoped(["region"])),
            (
                "subnet",
                NaturalKey::new(["cidr_block"]).scoped(["vpc_id", "availability_zone"]),
            ),
            ("security-group", NaturalKey::new(["group_name"]).scoped(["vpc_id"])),
            ("load-balancer", NaturalKey::new(["load_balancer_name"]).scoped(["vpc_id"])),
            ("target-group", NaturalKey::new(["target_group_name"]).scoped(["vpc_id"])),
            ("launch-template", NaturalKey::new(["launch_template_name"])),
        ]
        .into_iter()
        .map(|(t, key)| (t.to_string(), key))
        .collect();

        Self {
            provider_id_keys,
            natural_keys,
            name_threshold: DEFAULT_NAME_MATCH_THRESHOLD,
        }
    }

    /// Correlator with no type-specific knowledge
    pub fn empty() -> Self {
        Self {
            provider_id_keys: HashMap::new(),
            natural_keys: HashMap::new(),
            name_threshold: DEFAULT_NAME_MATCH_THRESHOLD,
        }
    }

    pub fn with_name_threshold(mut self, threshold: f64) -> Self {
        self.name_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_provider_id_key(mut self, resource_type: &str, key: impl Into<String>) -> Self {
        self.provider_id_keys
            .entry(normalize_type(resource_type))
            .or_default()
            .push(key.into());
        self
    }

    pub fn with_natural_key(mut self, resource_type: &str, key: NaturalKey) -> Self {
        self.natural_keys.insert(normalize_type(resource_type), key);
        self
    }

    pub fn name_threshold(&self) -> f64 {
        self.name_threshold
    }

    /// Provider-assigned IDs recorded on a managed record
    fn provider_ids<'r>(&self, resource: &'r ResourceState) -> Vec<&'r str> {
        let type_keys = self
            .provider_id_keys
            .get(&normalize_type(&resource.resource_type))
            .map(Vec::as_slice)
            .unwrap_or_default();
        std::iter::once("provider_id")
            .chain(type_keys.iter().map(String::as_str))
            .filter_map(|key| resource.property_str(key))
            .filter(|id| !id.is_empty())
            .collect()
    }

    fn same_type(managed: &ResourceState, live: &DiscoveredResource) -> bool {
        normalize_type(&managed.resource_type) == normalize_type(&live.resource_type)
    }

    fn exact_score(&self, managed: &ResourceState, live: &DiscoveredResource) -> Option<f64> {
        if managed.id == live.id
            || (Self::same_type(managed, live) && self.provider_ids(managed).contains(&live.id.as_str()))
        {
            Some(1.0)
        } else {
            None
        }
    }

    fn tag_score(&self, managed: &ResourceState, live: &DiscoveredResource) -> Option<f64> {
        if live.tags.get(MANAGED_ID_TAG) == Some(&managed.id) {
            return Some(1.0);
        }
        if !Self::same_type(managed, live) {
            return None;
        }
        self.natural_keys
            .get(&normalize_type(&managed.resource_type))
            .filter(|key| key.matches(managed, live))
            .map(|_| 1.0)
    }

    fn name_score(&self, managed: &ResourceState, live: &DiscoveredResource) -> Option<f64> {
        if !Self::same_type(managed, live) {
            return None;
        }
        let score = name_similarity(&managed.name, &live.name);
        (score > 0.0 && score + SCORE_EPSILON >= self.name_threshold).then_some(score)
    }

    /// Correlate every managed record against the live set. Checks
    /// `cancel` between records and fails with `Cancelled` when it fires.
    #[tracing::instrument(skip_all, fields(managed = managed.len(), discovered = discovered.len()))]
    pub fn correlate(
        &self,
        managed: &[ResourceState],
        discovered: &[DiscoveredResource],
        cancel: &CancellationToken,
    ) -> Result<CorrelationReport> {
        let mut managed: Vec<&ResourceState> = managed.iter().collect();
        managed.sort_by(|a, b| a.id.cmp(&b.id));
        let mut discovered: Vec<&DiscoveredResource> = discovered.iter().collect();
        discovered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut matching = Matching {
            claimed: vec![false; discovered.len()],
            managed,
            discovered,
            paired: HashMap::new(),
            tied: HashMap::new(),
        };

        self.pass(&mut matching, MatchBasis::ExactId, cancel, |m, d| self.exact_score(m, d))?;
        self.pass(&mut matching, MatchBasis::TagMatch, cancel, |m, d| self.tag_score(m, d))?;
        self.pass(&mut matching, MatchBasis::NameMatch, cancel, |m, d| self.name_score(m, d))?;

        let report = Self::finish(matching);
        info!(
            matched = report.matched().count(),
            missing = report.missing.len(),
            unmanaged = report.unmanaged.len(),
            ambiguous = report.ambiguous.len(),
            "Correlation completed"
        );
        Ok(report)
    }

    fn pass<F>(
        &self,
        matching: &mut Matching<'_>,
        basis: MatchBasis,
        cancel: &CancellationToken,
        score: F,
    ) -> Result<()>
    where
        F: Fn(&ResourceState, &DiscoveredResource) -> Option<f64>,
    {
        // managed index -> (best score, discovered indices at that score)
        let mut proposals: Vec<(usize, f64, Vec<usize>)> = Vec::new();

        for (m, managed) in matching.managed.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            if !matching.open(m) {
                continue;
            }

            let mut best: Option<(f64, Vec<usize>)> = None;
            for (d, live) in matching.discovered.iter().enumerate() {
                if matching.claimed[d] {
                    continue;
                }
                let Some(s) = score(managed, live) else {
                    continue;
                };
                let better = match &best {
                    Some((top, _)) => s > *top + SCORE_EPSILON,
                    None => true,
                };
                if better {
                    best = Some((s, vec![d]));
                } else if let Some((top, ds)) = &mut best
                    && (s - *top).abs() < SCORE_EPSILON
                {
                    ds.push(d);
                }
            }
            if let Some((s, ds)) = best {
                proposals.push((m, s, ds));
            }
        }

        // discovered index -> contenders proposing it as their unique best
        let mut contenders: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
        for (m, s, ds) in proposals {
            if ds.len() > 1 {
                debug!(
                    resource_id = %matching.managed[m].id,
                    basis = %basis,
                    candidates = ds.len(),
                    "Tied correlation candidates"
                );
                // Tie candidates stay out of every later pairing
                for &d in &ds {
                    matching.claimed[d] = true;
                }
                matching.tied.insert(m, ds);
            } else {
                contenders.entry(ds[0]).or_default().push((m, s));
            }
        }

        let mut contested: Vec<_> = contenders.into_iter().collect();
        contested.sort_by_key(|(d, _)| *d);
        for (d, mut bids) in contested {
            if matching.claimed[d] {
                for (m, _) in bids {
                    matching.tied.insert(m, vec![d]);
                }
                continue;
            }
            bids.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            let top = bids[0].1;
            let winners: Vec<usize> = bids
                .iter()
                .filter(|(_, s)| (s - top).abs() < SCORE_EPSILON)
                .map(|(m, _)| *m)
                .collect();

            if let [m] = winners[..] {
                matching.claimed[d] = true;
                matching.paired.insert(m, (d, basis, top));
                debug!(
                    resource_id = %matching.managed[m].id,
                    discovered_id = %matching.discovered[d].id,
                    basis = %basis,
                    confidence = top,
                    "Correlated"
                );
            } else {
                matching.claimed[d] = true;
                for m in winners {
                    matching.tied.insert(m, vec![d]);
                }
            }
        }
        Ok(())
    }

    fn finish(matching: Matching<'_>) -> CorrelationReport {
        let mut report = CorrelationReport::default();
        let mut candidate_of_tie = HashSet::new();

        for (m, managed) in matching.managed.iter().enumerate() {
            let mut correlation = ResourceCorrelation::unmatched(&managed.id);
            if let Some(&(d, basis, score)) = matching.paired.get(&m) {
                correlation.discovered = Some(matching.discovered[d].clone());
                correlation.basis = basis;
                correlation.confidence = score;
            } else if let Some(ds) = matching.tied.get(&m) {
                correlation.candidates = ds.iter().map(|&d| matching.discovered[d].id.clone()).collect();
                candidate_of_tie.extend(ds.iter().copied());
                report.ambiguous.push(managed.id.clone());
            } else {
                report.missing.push(managed.id.clone());
            }
            report.correlations.insert(managed.id.clone(), correlation);
        }

        report.unmanaged = matching
            .discovered
            .iter()
            .enumerate()
            .filter(|(d, _)| !matching.claimed[*d] && !candidate_of_tie.contains(d))
            .map(|(_, live)| (*live).clone())
            .collect();
        report
    }
}
