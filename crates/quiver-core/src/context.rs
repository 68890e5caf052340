//! Application context for unified dependency injection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::RepoCache;
use crate::config::QuiverConfig;
use crate::formats::FormatDetector;
use crate::registry::{RegistryStore, SkillInstaller};
use crate::scan::{ExternalScanner, SecurityScanner};
use crate::source::SourceResolver;
use crate::workflow::InstallWorkflow;

/// Resolved paths plus the loaded config.
///
/// The CLI creates this once and asks it for services.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: QuiverConfig,
    project_root: PathBuf,
    state_dir: PathBuf,
    skills_dir: PathBuf,
}

impl AppContext {
    /// Build a context from config, filling unset paths with platform defaults.
    pub fn from_config(config: QuiverConfig, project_root: PathBuf) -> anyhow::Result<Self> {
        let state_dir = match &config.paths.state_dir {
            Some(dir) => dir.clone(),
            None => default_state_dir()?,
        };
        let skills_dir = match &config.paths.skills_dir {
            Some(dir) => dir.clone(),
            None => default_skills_dir()?,
        };
        Ok(Self::new(config, project_root, state_dir, skills_dir))
    }

    /// Create a context with explicit paths.
    pub fn new(
        config: QuiverConfig,
        project_root: PathBuf,
        state_dir: PathBuf,
        skills_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            project_root,
            state_dir,
            skills_dir,
        }
    }

    pub fn config(&self) -> &QuiverConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    pub fn source_resolver(&self) -> SourceResolver {
        SourceResolver::new(self.project_root.clone())
    }

    pub fn repo_cache(&self) -> RepoCache {
        RepoCache::new(&self.state_dir, &self.config.clone, &self.config.cache)
    }

    pub fn format_detector(&self) -> FormatDetector {
        FormatDetector::new(self.config.detect.max_depth)
    }

    pub fn registry_store(&self) -> RegistryStore {
        RegistryStore::new(&self.state_dir)
    }

    pub fn skill_installer(&self) -> SkillInstaller {
        SkillInstaller::new(self.registry_store(), self.skills_dir.clone())
    }

    /// The configured external scanner.
    pub fn scanner(&self) -> Arc<dyn SecurityScanner> {
        Arc::new(ExternalScanner::new(&self.config.scan))
    }

    /// Install workflow using the configured scanner.
    pub fn install_workflow(&self) -> InstallWorkflow {
        self.install_workflow_with(self.scanner())
    }

    /// Install workflow using a caller-supplied scanner.
    pub fn install_workflow_with(&self, scanner: Arc<dyn SecurityScanner>) -> InstallWorkflow {
        InstallWorkflow::new(
            &self.config,
            &self.state_dir,
            self.source_resolver(),
            self.repo_cache(),
            self.skill_installer(),
            scanner,
        )
    }
}

/// `<state>/quiver`, falling back to the local data directory.
pub fn default_state_dir() -> anyhow::Result<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join("quiver"))
        .ok_or_else(|| anyhow::anyhow!("Could not determine state directory"))
}

/// `~/.claude/skills`.
pub fn default_skills_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".claude").join("skills"))
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn configured_paths_win_over_defaults() {
        let temp = TempDir::new().unwrap();
        let mut config = QuiverConfig::default();
        config.paths.state_dir = Some(temp.path().join("state"));
        config.paths.skills_dir = Some(temp.path().join("skills"));

        let ctx = AppContext::from_config(config, temp.path().to_path_buf()).unwrap();
        assert_eq!(ctx.state_dir(), temp.path().join("state"));
        assert_eq!(ctx.skills_dir(), temp.path().join("skills"));
        assert_eq!(
            ctx.registry_store().path(),
            temp.path().join("state").join("registry.json")
        );
        assert_eq!(ctx.repo_cache().root(), temp.path().join("state").join("cache"));
    }
}
