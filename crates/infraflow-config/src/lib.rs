pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{
    Config, ConflictSettings, DiscoverySettings, DriftSettings, EngineSettings, LogFormat,
    LoggingSettings, StateSettings,
};

use std::path::PathBuf;
use tracing::debug;

const CANDIDATES: [&str; 2] = ["infraflow.local.yaml", "infraflow.yaml"];

/// Locate the configuration file.
///
/// Search order:
/// 1. `INFRAFLOW_CONFIG_PATH` (direct path)
/// 2. current directory: `infraflow.local.yaml`, `infraflow.yaml`
/// 3. `./.infraflow/config.yaml`
/// 4. `~/.config/infraflow/config.yaml` (global)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("INFRAFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_config = current_dir.join(".infraflow").join("config.yaml");
    if project_config.exists() {
        return Ok(project_config);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("infraflow").join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load the discovered configuration file, or defaults when there is none,
/// then apply environment overrides. Returns the file that was used.
pub fn load_or_default() -> Result<(Config, Option<PathBuf>)> {
    let (mut config, source) = match find_config_file() {
        Ok(path) => (Config::load(&path)?, Some(path)),
        Err(ConfigError::ConfigFileNotFound) => (Config::default(), None),
        Err(e) => return Err(e),
    };
    config.apply_env_overrides();
    config.validate()?;
    debug!(source = ?source, "Configuration loaded");
    Ok((config, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    const CLEAN_ENV: [(&str, Option<&str>); 5] = [
        ("INFRAFLOW_CONFIG_PATH", None),
        ("INFRAFLOW_STATE_FILE", None),
        ("INFRAFLOW_LOG_LEVEL", None),
        ("INFRAFLOW_REGION", None),
        ("AWS_REGION", None),
    ];

    /// Run `f` inside a fresh temp directory with a clean environment
    fn in_temp_dir<F: FnOnce(&std::path::Path)>(f: F) {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        temp_env::with_vars(CLEAN_ENV, || f(temp_dir.path()));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        in_temp_dir(|dir| {
            fs::write(dir.join("infraflow.yaml"), "# test").unwrap();
            let found = find_config_file().unwrap();
            assert!(found.ends_with("infraflow.yaml"));
        });
    }

    #[test]
    #[serial]
    fn test_local_file_has_priority() {
        in_temp_dir(|dir| {
            fs::write(dir.join("infraflow.yaml"), "# shared").unwrap();
            fs::write(dir.join("infraflow.local.yaml"), "# local").unwrap();
            assert!(find_config_file().unwrap().ends_with("infraflow.local.yaml"));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        in_temp_dir(|dir| {
            fs::create_dir(dir.join(".infraflow")).unwrap();
            fs::write(dir.join(".infraflow/config.yaml"), "# project").unwrap();
            assert!(find_config_file().unwrap().ends_with(".infraflow/config.yaml"));
        });
    }

    #[test]
    #[serial]
    fn test_env_var_path_wins() {
        in_temp_dir(|dir| {
            let custom = dir.join("custom.yaml");
            fs::write(&custom, "engine:\n  region: eu-west-1\n").unwrap();
            fs::write(dir.join("infraflow.yaml"), "# ignored").unwrap();

            temp_env::with_var("INFRAFLOW_CONFIG_PATH", Some(&custom), || {
                assert_eq!(find_config_file().unwrap(), custom);
                let (config, source) = load_or_default().unwrap();
                assert_eq!(config.engine.region, "eu-west-1");
                assert_eq!(source, Some(custom.clone()));
            });
        });
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        in_temp_dir(|_| {
            let (config, source) = load_or_default().unwrap();
            // A global config on the host machine is allowed to exist
            if source.is_none() {
                assert_eq!(config, Config::default());
            }
        });
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        in_temp_dir(|dir| {
            fs::write(
                dir.join("infraflow.yaml"),
                "state:\n  file_path: from-file.json\nlogging:\n  level: warn\n",
            )
            .unwrap();

            temp_env::with_vars(
                [
                    ("INFRAFLOW_STATE_FILE", Some("from-env.json")),
                    ("INFRAFLOW_LOG_LEVEL", None),
                    ("AWS_REGION", Some("ap-northeast-1")),
                ],
                || {
                    let (config, _) = load_or_default().unwrap();
                    assert_eq!(config.state.file_path, PathBuf::from("from-env.json"));
                    assert_eq!(config.logging.level, "warn");
                    assert_eq!(config.engine.region, "ap-northeast-1");
                },
            );
        });
    }

    #[test]
    #[serial]
    fn test_invalid_file_reports_path() {
        in_temp_dir(|dir| {
            fs::write(dir.join("infraflow.yaml"), "engine: [not, a, map]\n").unwrap();
            match load_or_default() {
                Err(ConfigError::Parse { path, .. }) => assert!(path.ends_with("infraflow.yaml")),
                other => panic!("expected parse error, got {:?}", other),
            }
        });
    }
}
