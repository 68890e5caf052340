//! Final report of a workflow run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::Severity;
use crate::skills::{PackageType, RejectedCandidate};

use super::state::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Nothing failed
    Completed,
    /// Some skills installed, some failed
    Partial,
    /// Nothing installed and at least one failure
    Failed,
}

impl ReportStatus {
    pub fn from_counts(installed: usize, failures: usize) -> Self {
        match (installed, failures) {
            (_, 0) => Self::Completed,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledSkill {
    pub name: String,
    pub package_type: PackageType,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSkill {
    pub name: String,
    pub error: String,
    pub recoverable: bool,
}

/// A candidate deliberately left out by a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSkill {
    pub name: String,
    pub reason: String,
}

/// Outcome of a workflow that reached `installing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub workflow_id: String,
    pub source: String,
    pub status: ReportStatus,
    pub installed: Vec<InstalledSkill>,
    pub failed: Vec<FailedSkill>,
    pub skipped: Vec<SkippedSkill>,
    pub rejected: Vec<RejectedCandidate>,
    pub decisions: BTreeMap<String, Decision>,
    pub warnings: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl InstallReport {
    pub fn failure_count(&self) -> usize {
        self.failed.len() + self.rejected.len()
    }
}

/// Archived reports at `<state>/reports/<id>.json`.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("reports"),
        }
    }

    pub fn save(&self, report: &InstallReport) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create reports directory: {}", self.dir.display()))?;
        let path = self.dir.join(format!("{}.json", report.workflow_id));
        let bytes = serde_json::to_vec_pretty(report).context("Failed to serialize report")?;
        fs::write(&path, bytes)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, workflow_id: &str) -> anyhow::Result<Option<InstallReport>> {
        if workflow_id.contains(['/', '\\']) || workflow_id.starts_with('.') {
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.json", workflow_id));
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read report: {}", path.display()))?;
        Ok(Some(serde_json::from_slice(&bytes).with_context(|| {
            format!("Failed to parse report: {}", path.display())
        })?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_counts() {
        assert_eq!(ReportStatus::from_counts(3, 0), ReportStatus::Completed);
        assert_eq!(ReportStatus::from_counts(0, 0), ReportStatus::Completed);
        assert_eq!(ReportStatus::from_counts(2, 1), ReportStatus::Partial);
        assert_eq!(ReportStatus::from_counts(0, 1), ReportStatus::Failed);
    }
}
