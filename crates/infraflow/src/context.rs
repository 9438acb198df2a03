use anyhow::Context as _;
use infraflow_config::Config;
use infraflow_discovery::{SnapshotLister, StaticLister};
use infraflow_engine::{Reconciler, setup};
use infraflow_state::StateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// `--config` wins over discovery; `--state` wins over file and environment
pub fn load_config(path: Option<&Path>, state: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => {
            let mut config = Config::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => infraflow_config::load_or_default()?.0,
    };
    if let Some(state) = state {
        config.state.file_path = state;
    }
    config.validate()?;
    Ok(config)
}

/// Configuration plus the state loaded from the configured file. Saves take
/// the state file's lock for the duration of the write.
pub struct Context {
    pub config: Config,
    pub store: Arc<StateStore>,
}

impl Context {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = setup::state_store(&config)?;
        let count = store.load_state().await?;
        if !config.engine.region.is_empty() {
            store.set_region(config.engine.region.clone());
        }
        debug!(
            path = %config.state.file_path.display(),
            resources = count,
            "State opened"
        );
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        self.store.save_state().await?;
        Ok(())
    }

    pub fn reconciler(&self, live: &Path) -> anyhow::Result<Reconciler> {
        anyhow::ensure!(
            live.exists(),
            "Live snapshot not found: {}",
            live.display()
        );
        Ok(Reconciler::from_config(
            &self.config,
            Arc::clone(&self.store),
            Arc::new(SnapshotLister::new(live)),
        ))
    }

    /// Reconciler over the managed state alone, for commands with no live source
    pub fn offline_reconciler(&self) -> Reconciler {
        Reconciler::from_config(
            &self.config,
            Arc::clone(&self.store),
            Arc::new(StaticLister::default()),
        )
    }
}
