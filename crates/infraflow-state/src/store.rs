//! Resource state store
//!
//! Process-wide record of every managed resource. All access goes through
//! the CRUD methods below; the map itself is never handed out mutably.
//! A single read/write lock guards the map: readers run concurrently, a
//! writer excludes everyone. Persistence snapshots under the read lock and
//! never holds it across I/O.

use crate::drift::{ChangeDetection, DriftDetector};
use crate::error::{Result, StateError};
use crate::file::StateFile;
use crate::model::{InfrastructureState, Properties, ResourceState, ResourceStatus, ResourceUpdate};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

pub struct StateStore {
    state: RwLock<InfrastructureState>,
    file: Option<StateFile>,
    /// Serializes load/save so concurrent saves never race on the temp file
    io: tokio::sync::Mutex<()>,
    drift: DriftDetector,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StateStore {
    /// Store with no backing file; `load_state`/`save_state` fail with a storage error.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(InfrastructureState::new()),
            file: None,
            io: tokio::sync::Mutex::new(()),
            drift: DriftDetector::default(),
        }
    }

    pub fn with_file(file: StateFile) -> Self {
        Self {
            file: Some(file),
            ..Self::in_memory()
        }
    }

    pub fn with_drift_detector(mut self, drift: DriftDetector) -> Self {
        self.drift = drift;
        self
    }

    pub fn file(&self) -> Option<&StateFile> {
        self.file.as_ref()
    }

    pub fn region(&self) -> String {
        self.state.read().region.clone()
    }

    pub fn set_region(&self, region: impl Into<String>) {
        let mut state = self.state.write();
        state.region = region.into();
        state.last_updated = Utc::now();
    }

    /// Insert a new resource. `created_at` and `updated_at` are set to now.
    pub fn add_resource(&self, mut resource: ResourceState) -> Result<()> {
        if resource.id.trim().is_empty() {
            return Err(StateError::InvalidResource("resource id is empty".into()));
        }
        if resource.depends_on(&resource.id) {
            return Err(StateError::SelfDependency(resource.id));
        }
        dedupe(&mut resource.dependencies);

        let mut state = self.state.write();
        if state.resources.contains_key(&resource.id) {
            return Err(StateError::DuplicateId(resource.id));
        }

        let now = Utc::now();
        resource.created_at = now;
        resource.updated_at = now;
        resource.refresh_checksum();

        info!(
            resource_id = %resource.id,
            resource_type = %resource.resource_type,
            resource_name = %resource.name,
            "Adding resource to state"
        );
        state.resources.insert(resource.id.clone(), resource);
        state.last_updated = now;
        Ok(())
    }

    /// Merge a partial update into an existing resource and return the result
    pub fn update_resource(&self, id: &str, update: ResourceUpdate) -> Result<ResourceState> {
        if let Some(deps) = &update.dependencies
            && deps.iter().any(|d| d == id)
        {
            return Err(StateError::SelfDependency(id.to_string()));
        }

        self.mutate(id, |resource| {
            resource.properties.extend(update.properties);
            resource.tags.extend(update.tags);
            if let Some(name) = update.name {
                resource.name = name;
            }
            if let Some(status) = update.status {
                resource.status = status;
            }
            if let Some(description) = update.description {
                resource.description = description;
            }
            if let Some(mut deps) = update.dependencies {
                dedupe(&mut deps);
                resource.dependencies = deps;
            }
            debug!(resource_id = %resource.id, "Updated resource in state");
        })
    }

    /// Remove a resource. Other resources may keep listing it as a dependency;
    /// the graph engine reports those edges as dangling.
    pub fn remove_resource(&self, id: &str) -> Result<ResourceState> {
        let mut state = self.state.write();
        let removed = state
            .resources
            .remove(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        state.last_updated = Utc::now();

        let dependents = state
            .resources
            .values()
            .filter(|r| r.depends_on(id))
            .count();
        if dependents > 0 {
            warn!(
                resource_id = %id,
                dependents,
                "Removed resource is still referenced as a dependency"
            );
        } else {
            info!(resource_id = %id, "Removed resource from state");
        }
        Ok(removed)
    }

    pub fn get_resource(&self, id: &str) -> Result<ResourceState> {
        self.state
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().resources.contains_key(id)
    }

    /// Resources of one type sorted by ID; an empty filter returns every type.
    pub fn list_resources(&self, type_filter: &str) -> Vec<ResourceState> {
        self.state
            .read()
            .resources_of_type(type_filter)
            .cloned()
            .collect()
    }

    /// Record that `id` requires `depends_on` first. Idempotent.
    pub fn add_dependency(&self, id: &str, depends_on: &str) -> Result<()> {
        if id == depends_on {
            return Err(StateError::SelfDependency(id.to_string()));
        }

        let mut state = self.state.write();
        if !state.resources.contains_key(depends_on) {
            return Err(StateError::NotFound(depends_on.to_string()));
        }
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;

        if resource.depends_on(depends_on) {
            return Ok(());
        }

        info!(resource_id = %id, depends_on = %depends_on, "Adding dependency relationship");
        resource.dependencies.push(depends_on.to_string());
        resource.touch();
        state.last_updated = Utc::now();
        Ok(())
    }

    /// Drop a dependency edge. Returns whether the edge existed.
    pub fn remove_dependency(&self, id: &str, depends_on: &str) -> Result<bool> {
        let mut existed = false;
        self.mutate(id, |resource| {
            let before = resource.dependencies.len();
            resource.dependencies.retain(|d| d != depends_on);
            existed = resource.dependencies.len() != before;
        })?;
        Ok(existed)
    }

    pub fn get_dependencies(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.get_resource(id)?.dependencies)
    }

    /// IDs of resources that list `id` as a dependency, sorted
    pub fn get_dependents(&self, id: &str) -> Vec<String> {
        self.state
            .read()
            .resources
            .values()
            .filter(|r| r.depends_on(id))
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn set_status(&self, id: &str, status: ResourceStatus) -> Result<()> {
        self.mutate(id, |resource| resource.status = status)
            .map(|_| ())
    }

    pub fn rename(&self, id: &str, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.mutate(id, |resource| resource.name = name).map(|_| ())
    }

    /// Copy of every resource, sorted by ID, taken under the read lock
    pub fn snapshot(&self) -> Vec<ResourceState> {
        self.state.read().resources.values().cloned().collect()
    }

    /// Copy of the whole aggregate
    pub fn state(&self) -> InfrastructureState {
        self.state.read().clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Compare live properties against the stored baseline. `None` means no drift.
    pub fn detect_drift(
        &self,
        actual: &Properties,
        resource_id: &str,
    ) -> Result<Option<ChangeDetection>> {
        let (resource_type, baseline) = {
            let state = self.state.read();
            let resource = state
                .get(resource_id)
                .ok_or_else(|| StateError::NotFound(resource_id.to_string()))?;
            (resource.resource_type.clone(), resource.properties.clone())
        };

        let drift = self
            .drift
            .diff(resource_id, &resource_type, &baseline, actual);
        if let Some(d) = &drift {
            info!(
                resource_id = %resource_id,
                fields = d.diff.len(),
                severity = %d.severity,
                "Drift detected in resource"
            );
        }
        Ok(drift)
    }

    /// Replace the in-memory state with the backing file's contents.
    /// A missing file leaves an empty state. Returns the resource count.
    #[tracing::instrument(skip(self))]
    pub async fn load_state(&self) -> Result<usize> {
        let file = self.backing_file()?;
        let _io = self.io.lock().await;

        let mut loaded = file.load().await?.unwrap_or_default();
        for resource in loaded.resources.values_mut() {
            if !resource.checksum_matches() {
                warn!(resource_id = %resource.id, "Resource checksum mismatch, state was edited by hand");
                resource.refresh_checksum();
            }
        }

        let count = loaded.len();
        *self.state.write() = loaded;
        info!(resource_count = count, "Infrastructure state loaded");
        Ok(count)
    }

    /// Persist a snapshot of the current state. On failure the on-disk
    /// document and the in-memory state are both left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn save_state(&self) -> Result<()> {
        let file = self.backing_file()?;
        let _io = self.io.lock().await;

        let saved_at = Utc::now();
        let mut snapshot = self.state.read().clone();
        snapshot.last_saved = Some(saved_at);

        file.save(&snapshot).await?;
        self.state.write().last_saved = Some(saved_at);
        debug!(resource_count = snapshot.len(), "Infrastructure state saved");
        Ok(())
    }

    fn backing_file(&self) -> Result<&StateFile> {
        self.file
            .as_ref()
            .ok_or_else(|| StateError::Storage("no state file configured".into()))
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut ResourceState)) -> Result<ResourceState> {
        let mut state = self.state.write();
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        f(resource);
        resource.touch();
        let updated = resource.clone();
        state.last_updated = Utc::now();
        Ok(updated)
    }
}

fn dedupe(ids: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn vpc() -> ResourceState {
        ResourceState::new("vpc-1", "vpc")
            .with_name("main")
            .with_status(ResourceStatus::Created)
            .with_property("cidr_block", json!("10.0.0.0/16"))
    }

    #[test]
    fn test_add_and_get() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();

        let got = store.get_resource("vpc-1").unwrap();
        assert_eq!(got.name, "main");
        assert_eq!(got.created_at, got.updated_at);
        assert!(got.checksum_matches());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        let err = store.add_resource(vpc()).unwrap_err();
        assert!(matches!(err, StateError::DuplicateId(id) if id == "vpc-1"));
    }

    #[test]
    fn test_self_dependency_on_add_is_rejected() {
        let store = StateStore::in_memory();
        let err = store
            .add_resource(ResourceState::new("a", "vpc").with_dependency("a"))
            .unwrap_err();
        assert!(matches!(err, StateError::SelfDependency(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_forward_reference_is_allowed() {
        let store = StateStore::in_memory();
        store
            .add_resource(ResourceState::new("subnet-1", "subnet").with_dependency("vpc-later"))
            .unwrap();
        assert_eq!(store.get_dependencies("subnet-1").unwrap(), vec!["vpc-later"]);
    }

    #[test]
    fn test_remove_then_get_is_not_found() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        store.remove_resource("vpc-1").unwrap();
        assert!(matches!(
            store.get_resource("vpc-1"),
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            store.remove_resource("vpc-1"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_keeps_dangling_references() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        store
            .add_resource(ResourceState::new("subnet-1", "subnet").with_dependency("vpc-1"))
            .unwrap();

        store.remove_resource("vpc-1").unwrap();
        assert_eq!(store.get_dependencies("subnet-1").unwrap(), vec!["vpc-1"]);
    }

    #[test]
    fn test_update_merges_properties_and_keeps_dependencies() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        store
            .add_resource(ResourceState::new("subnet-1", "subnet").with_dependency("vpc-1"))
            .unwrap();
        let before = store.get_resource("subnet-1").unwrap();

        let updated = store
            .update_resource(
                "subnet-1",
                ResourceUpdate::new()
                    .property("cidr_block", json!("10.0.1.0/24"))
                    .status(ResourceStatus::Created),
            )
            .unwrap();

        assert_eq!(updated.dependencies, vec!["vpc-1"]);
        assert_eq!(updated.properties["cidr_block"], json!("10.0.1.0/24"));
        assert_eq!(updated.status, ResourceStatus::Created);
        assert!(updated.updated_at >= before.updated_at);
        assert_eq!(updated.created_at, before.created_at);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = StateStore::in_memory();
        let err = store
            .update_resource("nope", ResourceUpdate::new().name("x"))
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn test_update_rejects_self_dependency() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        let err = store
            .update_resource(
                "vpc-1",
                ResourceUpdate::new().dependencies(vec!["vpc-1".into()]),
            )
            .unwrap_err();
        assert!(matches!(err, StateError::SelfDependency(_)));
    }

    #[test]
    fn test_add_dependency_contract() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        store
            .add_resource(ResourceState::new("subnet-1", "subnet"))
            .unwrap();

        assert!(matches!(
            store.add_dependency("subnet-1", "subnet-1"),
            Err(StateError::SelfDependency(_))
        ));
        assert!(matches!(
            store.add_dependency("subnet-1", "vpc-9"),
            Err(StateError::NotFound(id)) if id == "vpc-9"
        ));
        assert!(matches!(
            store.add_dependency("subnet-9", "vpc-1"),
            Err(StateError::NotFound(id)) if id == "subnet-9"
        ));

        store.add_dependency("subnet-1", "vpc-1").unwrap();
        store.add_dependency("subnet-1", "vpc-1").unwrap();
        assert_eq!(store.get_dependencies("subnet-1").unwrap(), vec!["vpc-1"]);
        assert_eq!(store.get_dependents("vpc-1"), vec!["subnet-1"]);

        assert!(store.remove_dependency("subnet-1", "vpc-1").unwrap());
        assert!(!store.remove_dependency("subnet-1", "vpc-1").unwrap());
    }

    #[test]
    fn test_list_resources_by_type() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();
        store
            .add_resource(ResourceState::new("sg-1", "security-group"))
            .unwrap();

        assert_eq!(store.list_resources("vpc").len(), 1);
        assert_eq!(store.list_resources("").len(), 2);
        assert!(store.list_resources("db-instance").is_empty());
    }

    #[test]
    fn test_detect_drift_uses_stored_baseline() {
        let store = StateStore::in_memory();
        store.add_resource(vpc()).unwrap();

        let same = store.get_resource("vpc-1").unwrap().properties;
        assert!(store.detect_drift(&same, "vpc-1").unwrap().is_none());

        let mut changed = same.clone();
        changed.insert("cidr_block".into(), json!("10.9.0.0/16"));
        let first = store.detect_drift(&changed, "vpc-1").unwrap().unwrap();
        let second = store.detect_drift(&changed, "vpc-1").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fields().collect::<Vec<_>>(), vec!["cidr_block"]);

        assert!(matches!(
            store.detect_drift(&changed, "vpc-404"),
            Err(StateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        let store = StateStore::with_file(StateFile::new(&path));
        store.set_region("us-east-1");
        store.add_resource(vpc()).unwrap();
        store
            .add_resource(
                ResourceState::new("subnet-1", "subnet")
                    .with_dependency("vpc-1")
                    .with_tag("env", "prod")
                    .with_property("map_public_ip", json!(true)),
            )
            .unwrap();
        store.save_state().await.unwrap();

        let reloaded = StateStore::with_file(StateFile::new(&path));
        assert_eq!(reloaded.load_state().await.unwrap(), 2);
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded.region(), "us-east-1");
        assert!(reloaded.state().last_saved.is_some());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_memory_untouched() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        let store = StateStore::with_file(StateFile::new(&path));
        store.add_resource(vpc()).unwrap();

        std::fs::create_dir(temp_dir.path().join("state.json.tmp")).unwrap();
        let err = store.save_state().await.unwrap_err();
        assert!(err.is_storage_failure());
        assert!(store.state().last_saved.is_none());
        assert_eq!(store.len(), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_in_memory_store_cannot_persist() {
        let store = StateStore::in_memory();
        assert!(matches!(
            store.save_state().await,
            Err(StateError::Storage(_))
        ));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(StateStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .add_resource(ResourceState::new(format!("r-{}-{}", n, i), "vpc"))
                            .unwrap();
                        let _ = store.list_resources("vpc");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
    }
}
