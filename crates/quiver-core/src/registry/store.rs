//! Registry persistence with cross-process locking.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::Result;

use super::record::Registry;

/// Loads and saves `registry.json`.
///
/// Every mutation runs under an exclusive lock on `registry.lock` so
/// concurrent processes never interleave load-modify-save cycles.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl RegistryStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("registry.json"),
            lock_path: state_dir.join("registry.lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry; a missing file is an empty registry.
    pub fn load(&self) -> anyhow::Result<Registry> {
        if !self.path.exists() {
            return Ok(Registry::default());
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read registry: {}", self.path.display()))?;
        let registry: Registry = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse registry: {}", self.path.display()))?;
        registry.validate()?;
        Ok(registry)
    }

    /// Save the registry atomically (tmp + rename).
    pub fn save(&self, registry: &Registry) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Registry path has no parent"))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let tmp_path = self.tmp_path();
        let bytes = serde_json::to_vec_pretty(registry).context("Failed to serialize registry")?;
        fs::write(&tmp_path, bytes)
            .with_context(|| format!("Failed to write tmp registry: {}", tmp_path.display()))?;

        #[cfg(windows)]
        if self.path.exists() {
            fs::remove_file(&self.path).with_context(|| {
                format!("Failed to remove existing registry: {}", self.path.display())
            })?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to rename tmp registry: {}", tmp_path.display()))?;
        Ok(())
    }

    pub(crate) fn tmp_path(&self) -> PathBuf {
        self.path
            .with_file_name(format!("registry.json.{}.tmp", std::process::id()))
    }

    /// Run `f` while holding the exclusive registry lock.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        let mut lock = fd_lock::RwLock::new(file);
        let _guard = lock.write()?;
        f()
    }

    /// Load, modify, and save under the lock. Nothing is saved if `f` fails.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        self.with_lock(|| {
            let mut registry = self.load()?;
            let out = f(&mut registry)?;
            self.save(&registry)?;
            Ok(out)
        })
    }
}
