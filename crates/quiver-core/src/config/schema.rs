//! Configuration schema.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scan::Severity;

/// Complete configuration from config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiverConfig {
    pub paths: PathsConfig,
    pub clone: CloneConfig,
    pub cache: CacheConfig,
    pub scan: ScanConfig,
    pub detect: DetectConfig,
}

/// Filesystem locations. Unset entries fall back to platform defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Runtime directory skills are installed into
    pub skills_dir: Option<PathBuf>,
    /// State directory (cache, registry, checkpoints)
    pub state_dir: Option<PathBuf>,
}

/// Clone behaviour for remote sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Mirror URL templates tried in order before the canonical origin.
    ///
    /// Placeholders: `{url}`, `{repo}` (owner/repo), `{owner}`, `{name}`.
    pub mirrors: Vec<String>,
    /// Timeout for each mirror attempt
    pub mirror_timeout_secs: u64,
    /// Timeout for the final attempt against the canonical origin
    pub origin_timeout_secs: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            mirror_timeout_secs: 20,
            origin_timeout_secs: 300,
        }
    }
}

/// Repository cache freshness policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cached clones older than this are re-cloned. Unset: never stale.
    pub max_age_hours: Option<u64>,
}

/// External security scanner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Scanner argv; the candidate directory is appended as the last argument
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Minimum severity that suspends a workflow for a decision
    pub block_threshold: Severity,
    /// Worker pool size for batch scans
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "skill-scanner".to_string(),
                "scan".to_string(),
                "--json".to_string(),
            ],
            timeout_secs: 120,
            block_threshold: Severity::High,
            concurrency: 3,
        }
    }
}

/// Format detection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    pub max_depth: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl QuiverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan.command.is_empty() {
            anyhow::bail!("scan.command must name an executable");
        }
        if self.scan.concurrency == 0 {
            anyhow::bail!("scan.concurrency must be at least 1");
        }
        if self.clone.mirror_timeout_secs == 0 || self.clone.origin_timeout_secs == 0 {
            anyhow::bail!("clone timeouts must be greater than zero");
        }
        for mirror in &self.clone.mirrors {
            if !mirror.contains('{') {
                anyhow::bail!(
                    "Mirror template '{}' has no placeholder ({{url}}, {{repo}}, {{owner}}, {{name}})",
                    mirror
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: QuiverConfig = toml::from_str("").unwrap();
        assert_eq!(config, QuiverConfig::default());
        assert_eq!(config.scan.block_threshold, Severity::High);
        assert_eq!(config.scan.concurrency, 3);
        assert_eq!(config.detect.max_depth, 5);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: QuiverConfig = toml::from_str(
            r#"
[clone]
mirrors = ["https://mirror.example/{repo}"]

[scan]
block_threshold = "medium"
"#,
        )
        .unwrap();
        assert_eq!(config.clone.mirrors.len(), 1);
        assert_eq!(config.clone.origin_timeout_secs, 300);
        assert_eq!(config.scan.block_threshold, Severity::Medium);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn mirror_without_placeholder_is_rejected() {
        let mut config = QuiverConfig::default();
        config.clone.mirrors.push("https://mirror.example/".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }
}
