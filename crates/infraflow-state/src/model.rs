//! Data model for managed infrastructure resources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Current state document schema version
pub const STATE_VERSION: u32 = 1;

/// Heterogeneous resource attributes (strings, numbers, booleans, nested maps)
pub type Properties = BTreeMap<String, Value>;

/// Canonical form of a resource type tag: lowercase, `_` folded into `-`.
pub fn normalize_type(resource_type: &str) -> String {
    resource_type.trim().to_ascii_lowercase().replace('_', "-")
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Stable resource ID, unique within the store
    pub id: String,

    /// Human-facing resource name
    #[serde(default)]
    pub name: String,

    /// Resource kind tag (e.g., "vpc", "ec2-instance")
    pub resource_type: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: ResourceStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Resource attributes (CIDR, instance type, etc.)
    #[serde(default)]
    pub properties: Properties,

    /// IDs of resources that must exist before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// When the resource was first recorded
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// SHA-256 over identity, status, tags, properties and dependencies
    #[serde(default)]
    pub checksum: String,

    /// Fields written by newer versions, preserved on round trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut resource = Self {
            id: id.into(),
            name: String::new(),
            resource_type: resource_type.into(),
            status: ResourceStatus::Unknown,
            description: String::new(),
            tags: BTreeMap::new(),
            properties: Properties::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            checksum: String::new(),
            extra: BTreeMap::new(),
        };
        resource.refresh_checksum();
        resource
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.refresh_checksum();
        self
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self.refresh_checksum();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self.refresh_checksum();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self.refresh_checksum();
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self.refresh_checksum();
        self
    }

    /// Get a property value as a specific type
    pub fn get_property<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.properties
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a property as a string slice, if it is one
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|d| d == id)
    }

    /// Compute the content checksum. Timestamps are excluded.
    pub fn compute_checksum(&self) -> String {
        #[derive(Serialize)]
        struct Content<'a> {
            id: &'a str,
            name: &'a str,
            resource_type: &'a str,
            status: ResourceStatus,
            tags: &'a BTreeMap<String, String>,
            properties: &'a Properties,
            dependencies: &'a [String],
        }

        let content = Content {
            id: &self.id,
            name: &self.name,
            resource_type: &self.resource_type,
            status: self.status,
            tags: &self.tags,
            properties: &self.properties,
            dependencies: &self.dependencies,
        };
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn refresh_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn checksum_matches(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Bump `updated_at` without ever moving it backwards.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
        self.refresh_checksum();
    }
}

/// Lifecycle status of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource exists
    Created,
    /// Resource is being modified
    Updating,
    /// Resource is being removed
    Deleting,
    /// Resource is in error state
    Error,
    /// Status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Created => write!(f, "created"),
            ResourceStatus::Updating => write!(f, "updating"),
            ResourceStatus::Deleting => write!(f, "deleting"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(ResourceStatus::Created),
            "updating" => Ok(ResourceStatus::Updating),
            "deleting" => Ok(ResourceStatus::Deleting),
            "error" => Ok(ResourceStatus::Error),
            "unknown" => Ok(ResourceStatus::Unknown),
            other => Err(format!("unknown resource status: {}", other)),
        }
    }
}

/// Partial update applied by `StateStore::update_resource`.
///
/// Properties are merged key by key. Dependencies are only replaced when
/// explicitly set.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub properties: Properties,
    pub name: Option<String>,
    pub status: Option<ResourceStatus>,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub dependencies: Option<Vec<String>>,
}

impl ResourceUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.name.is_none()
            && self.status.is_none()
            && self.description.is_none()
            && self.tags.is_empty()
            && self.dependencies.is_none()
    }
}

/// The persisted aggregate: every managed resource plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureState {
    /// State document schema version
    pub version: u32,

    /// Last in-memory mutation
    pub last_updated: DateTime<Utc>,

    /// Last successful save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<DateTime<Utc>>,

    #[serde(default)]
    pub region: String,

    /// Resources indexed by ID
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    /// Fields written by newer versions, preserved on round trip
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for InfrastructureState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            last_saved: None,
            region: String::new(),
            resources: BTreeMap::new(),
            metadata: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl InfrastructureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources of one type; an empty filter matches every type.
    pub fn resources_of_type<'a>(
        &'a self,
        type_filter: &'a str,
    ) -> impl Iterator<Item = &'a ResourceState> + 'a {
        self.resources
            .values()
            .filter(move |r| type_filter.is_empty() || r.resource_type == type_filter)
    }
}
