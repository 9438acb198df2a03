//! Live resource listing
//!
//! The engine never talks to a cloud API itself. It consumes whatever
//! implements [`LiveResourceLister`]: an SDK-backed adapter, a snapshot file
//! captured by another tool, or a fixed list in tests.

use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use infraflow_state::{Properties, ResourceState, ResourceStatus, normalize_type};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A resource as observed in the live environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub id: String,

    #[serde(rename = "type", alias = "resource_type")]
    pub resource_type: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub properties: Properties,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl DiscoveredResource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            name: String::new(),
            properties: Properties::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Record to import when adopting this resource into the store
    pub fn to_resource_state(&self) -> ResourceState {
        let mut state = ResourceState::new(self.id.clone(), self.resource_type.clone())
            .with_name(self.name.clone())
            .with_status(ResourceStatus::Created);
        state.properties = self.properties.clone();
        state.tags = self.tags.clone();
        state.refresh_checksum();
        state
    }
}

/// Source of live resources
#[async_trait]
pub trait LiveResourceLister: Send + Sync {
    /// Lister name used in logs and failure reports
    fn name(&self) -> &str;

    /// List live resources of `resource_type`, or of every type when `None`
    async fn list(&self, resource_type: Option<&str>) -> Result<Vec<DiscoveredResource>>;
}

fn filter_by_type(resources: &[DiscoveredResource], resource_type: Option<&str>) -> Vec<DiscoveredResource> {
    let wanted = resource_type.map(normalize_type);
    resources
        .iter()
        .filter(|r| {
            wanted
                .as_deref()
                .is_none_or(|t| normalize_type(&r.resource_type) == t)
        })
        .cloned()
        .collect()
}

/// Serves a fixed in-memory list
#[derive(Debug, Clone, Default)]
pub struct StaticLister {
    resources: Vec<DiscoveredResource>,
}

impl StaticLister {
    pub fn new(resources: Vec<DiscoveredResource>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl LiveResourceLister for StaticLister {
    fn name(&self) -> &str {
        "static"
    }

    async fn list(&self, resource_type: Option<&str>) -> Result<Vec<DiscoveredResource>> {
        Ok(filter_by_type(&self.resources, resource_type))
    }
}

/// Snapshot document: either a bare array or `{ "resources": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    List(Vec<DiscoveredResource>),
    Wrapped { resources: Vec<DiscoveredResource> },
}

/// Reads live resources from a JSON snapshot file on every call
#[derive(Debug, Clone)]
pub struct SnapshotLister {
    path: PathBuf,
}

impl SnapshotLister {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parse(content: &str) -> Result<Vec<DiscoveredResource>> {
        let document: SnapshotDocument = serde_json::from_str(content)?;
        let resources = match document {
            SnapshotDocument::List(resources) => resources,
            SnapshotDocument::Wrapped { resources } => resources,
        };
        if let Some(bad) = resources.iter().find(|r| r.id.trim().is_empty()) {
            return Err(DiscoveryError::InvalidSnapshot(format!(
                "resource of type '{}' has an empty id",
                bad.resource_type
            )));
        }
        Ok(resources)
    }
}

#[async_trait]
impl LiveResourceLister for SnapshotLister {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn list(&self, resource_type: Option<&str>) -> Result<Vec<DiscoveredResource>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DiscoveryError::lister("snapshot", format!("{}: {}", self.path.display(), e)))?;
        let resources = Self::parse(&content)?;
        debug!(
            path = %self.path.display(),
            count = resources.len(),
            "Snapshot loaded"
        );
        Ok(filter_by_type(&resources, resource_type))
    }
}
