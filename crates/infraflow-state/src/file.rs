//! State file persistence
//!
//! Manages the `state.json` document on disk. Saves are atomic: the new
//! document is written and synced to `state.json.tmp`, the previous document
//! is copied to `state.json.backup`, then the temp file is renamed over the
//! original. A crash at any point leaves either the old or the new document.

use crate::error::{Result, StateError};
use crate::model::{InfrastructureState, STATE_VERSION};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_STATE_PATH: &str = ".infraflow/state.json";

const TEMP_SUFFIX: &str = "tmp";
const BACKUP_SUFFIX: &str = "backup";
const LOCK_SUFFIX: &str = "lock";

/// Reads and writes one state document
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    backup_enabled: bool,
    stale_lock_after: Duration,
}

impl StateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            backup_enabled: true,
            stale_lock_after: Duration::hours(1),
        }
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    pub fn with_stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(BACKUP_SUFFIX)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(TEMP_SUFFIX)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(LOCK_SUFFIX)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
            && !fs::try_exists(dir).await?
        {
            fs::create_dir_all(dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the state document. `None` when no document has been saved yet.
    pub async fn load(&self) -> Result<Option<InfrastructureState>> {
        if !fs::try_exists(&self.path).await? {
            tracing::debug!(path = %self.path.display(), "State file not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).await?;
        let state: InfrastructureState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }

        tracing::debug!(
            path = %self.path.display(),
            resources = state.resources.len(),
            "Loaded state"
        );
        Ok(Some(state))
    }

    /// Atomically replace the state document
    pub async fn save(&self, state: &InfrastructureState) -> Result<()> {
        self.ensure_state_dir().await?;
        let lock = self.acquire_lock().await?;

        let content = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        if let Err(e) = write_synced(&temp, content.as_bytes()).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        if self.backup_enabled && fs::try_exists(&self.path).await? {
            fs::copy(&self.path, self.backup_path()).await?;
            tracing::debug!("Rotated state backup");
        }

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        lock.release().await?;
        tracing::debug!(
            path = %self.path.display(),
            resources = state.resources.len(),
            "Saved state"
        );
        Ok(())
    }

    /// Acquire the advisory lock guarding writes to this document
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&info)?;

        for attempt in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!("Acquired state lock");
                    return Ok(StateLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt == 0 => {
                    let existing = fs::read_to_string(&lock_path).await.unwrap_or_default();
                    match serde_json::from_str::<LockInfo>(&existing) {
                        Ok(held)
                            if Utc::now().signed_duration_since(held.acquired_at)
                                < self.stale_lock_after =>
                        {
                            return Err(StateError::Lock(format!(
                                "State is locked by {} (pid {}) since {}",
                                held.holder, held.pid, held.acquired_at
                            )));
                        }
                        Ok(held) => {
                            tracing::warn!(holder = %held.holder, "Removing stale lock");
                        }
                        Err(_) => {
                            tracing::warn!(path = %lock_path.display(), "Removing unreadable lock");
                        }
                    }
                    fs::remove_file(&lock_path).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StateError::Lock(format!(
            "could not create {}",
            lock_path.display()
        )))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if fs::try_exists(&self.lock_path).await? {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Synchronous cleanup in drop - not ideal but necessary
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
