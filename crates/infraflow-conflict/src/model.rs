//! Conflict and resolution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    DuplicateName,
    RuleOverlap,
    DanglingDependency,
    CapacityViolation,
    Other,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::DuplicateName => "duplicate-name",
            ConflictType::RuleOverlap => "rule-overlap",
            ConflictType::DanglingDependency => "dangling-dependency",
            ConflictType::CapacityViolation => "capacity-violation",
            ConflictType::Other => "other",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "duplicate-name" => Ok(ConflictType::DuplicateName),
            "rule-overlap" => Ok(ConflictType::RuleOverlap),
            "dangling-dependency" => Ok(ConflictType::DanglingDependency),
            "capacity-violation" => Ok(ConflictType::CapacityViolation),
            "other" => Ok(ConflictType::Other),
            other => Err(format!("Unknown conflict type: {}", other)),
        }
    }
}

/// What a remedy changes in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Remove `dependency_id` from the conflicting resource's dependencies
    DropDependency { dependency_id: String },
    /// Give resources new names, resource ID -> new name
    Rename { renames: BTreeMap<String, String> },
    /// Overwrite one property of the conflicting resource
    SetProperty { property: String, value: Value },
}

impl std::fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionAction::DropDependency { dependency_id } => {
                write!(f, "drop dependency on {}", dependency_id)
            }
            ResolutionAction::Rename { renames } => {
                let parts: Vec<String> = renames
                    .iter()
                    .map(|(id, name)| format!("{} -> '{}'", id, name))
                    .collect();
                write!(f, "rename {}", parts.join(", "))
            }
            ResolutionAction::SetProperty { property, value } => {
                write!(f, "set {} = {}", property, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionAction,
    pub reason: String,
    /// 0.0..=1.0
    pub confidence: f64,
    /// The resource must be deployed again once the action is applied
    pub redeploy: bool,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    pub fn new(action: ResolutionAction, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            action,
            reason: reason.into(),
            confidence,
            redeploy: false,
            resolved_at: Utc::now(),
        }
    }

    pub fn with_redeploy(mut self) -> Self {
        self.redeploy = true;
        self
    }
}

/// One detected inconsistency; `resolution` stays `None` until a remedy
/// has been computed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_ids: Vec<String>,
    pub conflict_type: ConflictType,
    pub details: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, Value>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

impl Conflict {
    pub fn new(
        resource_id: impl Into<String>,
        conflict_type: ConflictType,
        details: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            related_ids: Vec::new(),
            conflict_type,
            details: details.into(),
            evidence: BTreeMap::new(),
            resolution: None,
        }
    }

    pub fn with_related<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.into(), value.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// The conflicting resource followed by every related resource
    pub fn involved_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.resource_id.as_str()).chain(self.related_ids.iter().map(String::as_str))
    }

    pub fn evidence_str(&self, key: &str) -> Option<&str> {
        self.evidence.get(key).and_then(Value::as_str)
    }

    pub fn evidence_f64(&self, key: &str) -> Option<f64> {
        self.evidence.get(key).and_then(Value::as_f64)
    }
}
