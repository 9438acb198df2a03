//! Drift detection
//!
//! Compares a resource's live properties against its recorded baseline and
//! classifies every differing field through a registry of severity policies.

use crate::error::{Result, StateError};
use crate::model::{Properties, normalize_type};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Drift severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// How a single field diverged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Present live, absent from the baseline
    Added,
    /// Present in the baseline, absent live
    Removed,
    /// Present in both with different values (including type changes)
    Modified,
}

/// One entry of the field-level diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub kind: ChangeKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub severity: Severity,
}

/// Drift record for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDetection {
    pub resource_id: String,
    pub resource_type: String,
    /// Changed property name -> old/new values
    pub diff: BTreeMap<String, FieldChange>,
    /// Highest severity among the diff entries
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

// detected_at is excluded so repeated detection over the same input compares equal
impl PartialEq for ChangeDetection {
    fn eq(&self, other: &Self) -> bool {
        self.resource_id == other.resource_id
            && self.resource_type == other.resource_type
            && self.diff == other.diff
            && self.severity == other.severity
    }
}

impl ChangeDetection {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.diff.keys().map(String::as_str)
    }

    pub fn fields_with(&self, kind: ChangeKind) -> Vec<&str> {
        self.diff
            .iter()
            .filter(|(_, c)| c.kind == kind)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Pluggable severity classification.
///
/// Returning `None` defers to the next registered policy.
pub trait SeverityPolicy: Send + Sync {
    fn classify(&self, resource_type: &str, field: &str, kind: ChangeKind) -> Option<Severity>;
}

impl<F> SeverityPolicy for F
where
    F: Fn(&str, &str, ChangeKind) -> Option<Severity> + Send + Sync,
{
    fn classify(&self, resource_type: &str, field: &str, kind: ChangeKind) -> Option<Severity> {
        self(resource_type, field, kind)
    }
}

/// Classifies fields by glob patterns over property names
#[derive(Debug, Clone, Default)]
pub struct FieldPatternPolicy {
    high: Vec<glob::Pattern>,
    low: Vec<glob::Pattern>,
}

impl FieldPatternPolicy {
    pub fn new<H, L>(high: H, low: L) -> Result<Self>
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
    {
        Ok(Self {
            high: compile(high)?,
            low: compile(low)?,
        })
    }

    /// Identity and network placement fields are high, descriptive fields low.
    pub fn defaults() -> Self {
        Self::new(DEFAULT_HIGH_FIELDS, DEFAULT_LOW_FIELDS).unwrap_or_default()
    }
}

pub const DEFAULT_HIGH_FIELDS: &[&str] = &[
    "id",
    "*_id",
    "*_arn",
    "cidr_block",
    "region",
    "availability_zone",
    "engine",
    "instance_type",
    "security_groups",
    "subnets",
];

pub const DEFAULT_LOW_FIELDS: &[&str] = &["name", "description", "tags", "tag:*", "tags.*"];

fn compile<I>(patterns: I) -> Result<Vec<glob::Pattern>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| {
            glob::Pattern::new(p.as_ref())
                .map_err(|e| StateError::InvalidPolicy(format!("{}: {}", p.as_ref(), e)))
        })
        .collect()
}

impl SeverityPolicy for FieldPatternPolicy {
    fn classify(&self, _resource_type: &str, field: &str, _kind: ChangeKind) -> Option<Severity> {
        if self.high.iter().any(|p| p.matches(field)) {
            Some(Severity::High)
        } else if self.low.iter().any(|p| p.matches(field)) {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

/// Structural differ with a severity policy registry keyed by resource type
#[derive(Clone)]
pub struct DriftDetector {
    by_type: HashMap<String, Vec<Arc<dyn SeverityPolicy>>>,
    global: Vec<Arc<dyn SeverityPolicy>>,
    fallback: Severity,
}

impl Default for DriftDetector {
    /// Every drifted field is medium severity.
    fn default() -> Self {
        Self {
            by_type: HashMap::new(),
            global: Vec::new(),
            fallback: Severity::Medium,
        }
    }
}

impl std::fmt::Debug for DriftDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftDetector")
            .field("typed_policies", &self.by_type.keys().collect::<Vec<_>>())
            .field("global_policies", &self.global.len())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl DriftDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector with `FieldPatternPolicy::defaults()` registered globally
    pub fn with_default_policies() -> Self {
        Self::new().with_global_policy(FieldPatternPolicy::defaults())
    }

    pub fn with_fallback(mut self, severity: Severity) -> Self {
        self.fallback = severity;
        self
    }

    /// Register a policy consulted only for one resource type.
    /// Type policies run before global ones, in registration order.
    pub fn with_type_policy(
        mut self,
        resource_type: impl AsRef<str>,
        policy: impl SeverityPolicy + 'static,
    ) -> Self {
        self.by_type
            .entry(normalize_type(resource_type.as_ref()))
            .or_default()
            .push(Arc::new(policy));
        self
    }

    pub fn with_global_policy(mut self, policy: impl SeverityPolicy + 'static) -> Self {
        self.global.push(Arc::new(policy));
        self
    }

    fn classify(&self, resource_type: &str, field: &str, kind: ChangeKind) -> Severity {
        self.by_type
            .get(&normalize_type(resource_type))
            .into_iter()
            .flatten()
            .chain(self.global.iter())
            .find_map(|p| p.classify(resource_type, field, kind))
            .unwrap_or(self.fallback)
    }

    /// Diff `actual` against `baseline`. `None` means no drift.
    pub fn diff(
        &self,
        resource_id: &str,
        resource_type: &str,
        baseline: &Properties,
        actual: &Properties,
    ) -> Option<ChangeDetection> {
        let mut diff = BTreeMap::new();

        for (key, old) in baseline {
            let (kind, new) = match actual.get(key) {
                None => (ChangeKind::Removed, None),
                Some(new) if new != old => (ChangeKind::Modified, Some(new.clone())),
                Some(_) => continue,
            };
            let severity = self.classify(resource_type, key, kind);
            diff.insert(
                key.clone(),
                FieldChange {
                    kind,
                    old: Some(old.clone()),
                    new,
                    severity,
                },
            );
        }

        for (key, new) in actual {
            if baseline.contains_key(key) {
                continue;
            }
            let severity = self.classify(resource_type, key, ChangeKind::Added);
            diff.insert(
                key.clone(),
                FieldChange {
                    kind: ChangeKind::Added,
                    old: None,
                    new: Some(new.clone()),
                    severity,
                },
            );
        }

        let severity = diff.values().map(|c| c.severity).max()?;
        Some(ChangeDetection {
            resource_id: resource_id.to_string(),
            resource_type: resource_type.to_string(),
            diff,
            severity,
            detected_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_identical_properties_have_no_drift() {
        let baseline = props(json!({"cidr_block": "10.0.0.0/16", "enable_dns": true}));
        let detector = DriftDetector::new();
        assert!(detector.diff("vpc-1", "vpc", &baseline, &baseline.clone()).is_none());
    }

    #[test]
    fn test_added_removed_and_modified() {
        let baseline = props(json!({"instance_type": "t3.micro", "monitoring": false}));
        let actual = props(json!({"instance_type": "t3.large", "public_ip": "54.1.2.3"}));

        let drift = DriftDetector::new()
            .diff("i-1", "ec2-instance", &baseline, &actual)
            .unwrap();

        assert_eq!(drift.fields_with(ChangeKind::Modified), vec!["instance_type"]);
        assert_eq!(drift.fields_with(ChangeKind::Removed), vec!["monitoring"]);
        assert_eq!(drift.fields_with(ChangeKind::Added), vec!["public_ip"]);
        assert_eq!(drift.diff["monitoring"].new, None);
        assert_eq!(drift.diff["public_ip"].old, None);
        assert_eq!(drift.severity, Severity::Medium);
    }

    #[test]
    fn test_type_change_is_drift() {
        let baseline = props(json!({"port": 443}));
        let actual = props(json!({"port": "443"}));
        let drift = DriftDetector::new()
            .diff("lb-1", "load-balancer", &baseline, &actual)
            .unwrap();
        assert_eq!(drift.diff["port"].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_default_policies_classify_fields() {
        let baseline = props(json!({"vpc_id": "vpc-1", "description": "web"}));
        let actual = props(json!({"vpc_id": "vpc-2", "description": "api"}));
        let drift = DriftDetector::with_default_policies()
            .diff("sg-1", "security-group", &baseline, &actual)
            .unwrap();

        assert_eq!(drift.diff["vpc_id"].severity, Severity::High);
        assert_eq!(drift.diff["description"].severity, Severity::Low);
        assert_eq!(drift.severity, Severity::High);
    }

    #[test]
    fn test_type_policy_runs_before_global() {
        let detector = DriftDetector::with_default_policies().with_type_policy(
            "db-instance",
            |_: &str, field: &str, _: ChangeKind| (field == "name").then_some(Severity::High),
        );

        let baseline = props(json!({"name": "orders"}));
        let actual = props(json!({"name": "orders-v2"}));

        let db = detector.diff("db-1", "db-instance", &baseline, &actual).unwrap();
        assert_eq!(db.severity, Severity::High);

        let vpc = detector.diff("vpc-1", "vpc", &baseline, &actual).unwrap();
        assert_eq!(vpc.severity, Severity::Low);

        // Either separator spelling reaches the same policy
        let db = detector.diff("db-2", "DB_Instance", &baseline, &actual).unwrap();
        assert_eq!(db.severity, Severity::High);
    }

    #[test]
    fn test_repeated_detection_compares_equal() {
        let baseline = props(json!({"size": 20}));
        let actual = props(json!({"size": 40}));
        let detector = DriftDetector::new();
        let first = detector.diff("vol-1", "ebs-volume", &baseline, &actual);
        let second = detector.diff("vol-1", "ebs-volume", &baseline, &actual);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = FieldPatternPolicy::new(["[unclosed"], Vec::<String>::new());
        assert!(matches!(result, Err(StateError::InvalidPolicy(_))));
    }
}
