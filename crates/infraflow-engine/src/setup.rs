//! Build engine components from a loaded [`Config`]

use crate::error::Result;
use infraflow_config::{Config, ConflictSettings, DiscoverySettings, DriftSettings};
use infraflow_conflict::ConflictResolver;
use infraflow_discovery::Correlator;
use infraflow_state::drift::{DEFAULT_HIGH_FIELDS, DEFAULT_LOW_FIELDS};
use infraflow_state::{DriftDetector, FieldPatternPolicy, StateFile, StateStore};

fn patterns(configured: &Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    match configured {
        Some(fields) => fields.clone(),
        None => defaults.iter().map(|f| f.to_string()).collect(),
    }
}

/// Severity classification from the configured glob lists
pub fn drift_detector(settings: &DriftSettings) -> Result<DriftDetector> {
    let policy = FieldPatternPolicy::new(
        patterns(&settings.high_severity_fields, DEFAULT_HIGH_FIELDS),
        patterns(&settings.low_severity_fields, DEFAULT_LOW_FIELDS),
    )?;
    Ok(DriftDetector::new().with_global_policy(policy))
}

pub fn state_file(config: &Config) -> StateFile {
    let stale_after = chrono::Duration::seconds(
        i64::try_from(config.state.lock_timeout_secs).unwrap_or(i64::MAX),
    );
    StateFile::new(&config.state.file_path)
        .with_backup(config.state.backup_enabled)
        .with_stale_lock_after(stale_after)
}

/// File-backed store. The state is not loaded yet.
pub fn state_store(config: &Config) -> Result<StateStore> {
    let store = StateStore::with_file(state_file(config))
        .with_drift_detector(drift_detector(&config.drift)?);
    if !config.engine.region.is_empty() {
        store.set_region(config.engine.region.clone());
    }
    Ok(store)
}

pub fn correlator(settings: &DiscoverySettings) -> Correlator {
    Correlator::new().with_name_threshold(settings.name_match_threshold)
}

pub fn conflict_resolver(settings: &ConflictSettings) -> ConflictResolver {
    match &settings.stateful_types {
        Some(types) => ConflictResolver::new()
            .without_stateful_types()
            .with_stateful_types(types),
        None => ConflictResolver::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infraflow_state::{ResourceState, Severity};
    use serde_json::json;

    #[test]
    fn test_configured_fields_replace_defaults() {
        let settings = DriftSettings {
            high_severity_fields: Some(vec!["engine_*".to_string()]),
            low_severity_fields: None,
        };
        let store = StateStore::in_memory().with_drift_detector(drift_detector(&settings).unwrap());
        store
            .add_resource(
                ResourceState::new("db-1", "db-instance")
                    .with_property("engine_version", json!("15.2"))
                    .with_property("vpc_id", json!("vpc-1")),
            )
            .unwrap();

        let actual = [
            ("engine_version".to_string(), json!("16.1")),
            ("vpc_id".to_string(), json!("vpc-1")),
        ]
        .into_iter()
        .collect();
        let drift = store.detect_drift(&actual, "db-1").unwrap().unwrap();
        assert_eq!(drift.severity, Severity::High);

        // vpc_id is high by default but the configured list replaced that
        let actual = [
            ("engine_version".to_string(), json!("15.2")),
            ("vpc_id".to_string(), json!("vpc-2")),
        ]
        .into_iter()
        .collect();
        let drift = store.detect_drift(&actual, "db-1").unwrap().unwrap();
        assert_eq!(drift.severity, Severity::Medium);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let settings = DriftSettings {
            high_severity_fields: Some(vec!["[".to_string()]),
            low_severity_fields: None,
        };
        assert!(drift_detector(&settings).is_err());
    }

    #[test]
    fn test_store_uses_configured_paths() {
        let mut config = Config::default();
        config.state.file_path = "custom/state.json".into();
        config.engine.region = "eu-central-1".into();
        let store = state_store(&config).unwrap();
        assert_eq!(
            store.file().unwrap().path(),
            std::path::Path::new("custom/state.json")
        );
        assert_eq!(store.region(), "eu-central-1");
    }
}
