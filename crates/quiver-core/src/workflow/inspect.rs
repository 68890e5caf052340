//! Operations on sources and installed skills outside an install run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::formats::FormatDetector;
use crate::registry::SkillInstaller;
use crate::scan::{SecurityScanner, Severity, batch_scan};
use crate::skills::{NormalizedSkill, Normalizer, RejectedCandidate};

/// What installing a directory would produce.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub root: PathBuf,
    pub skills: Vec<NormalizedSkill>,
    pub rejected: Vec<RejectedCandidate>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.skills.is_empty() && self.rejected.is_empty()
    }
}

/// Detect and normalize every candidate under `root` without staging anything.
pub fn validate_path(root: &Path, detector: &FormatDetector) -> Result<ValidationReport> {
    if !root.is_dir() {
        return Err(PipelineError::source_resolution(
            root.display().to_string(),
            "not a directory",
        ));
    }
    let candidates = detector.detect(root)?;
    if candidates.is_empty() {
        return Err(PipelineError::NoCandidates {
            source_name: root.display().to_string(),
        });
    }
    let root_name = root
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "skill".to_string());
    let (skills, rejected) = Normalizer::new().plan_all(&candidates, &root_name);
    Ok(ValidationReport {
        root: root.to_path_buf(),
        skills,
        rejected,
    })
}

/// Scan verdict for one installed skill.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledScan {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub findings: usize,
    /// At or above the blocking threshold
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Re-scan installed skills (all, or just `name`) and record each verdict.
pub async fn scan_installed(
    installer: &SkillInstaller,
    scanner: Arc<dyn SecurityScanner>,
    name: Option<&str>,
    threshold: Severity,
    concurrency: usize,
) -> Result<Vec<InstalledScan>> {
    let mut records: Vec<_> = installer
        .list()?
        .into_iter()
        .filter(|r| r.installed)
        .collect();
    if let Some(name) = name {
        records.retain(|r| r.name.eq_ignore_ascii_case(name));
        if records.is_empty() {
            return Err(PipelineError::NotFound {
                name: name.to_string(),
            });
        }
    }

    let items = records
        .into_iter()
        .map(|r| (r.name, r.installed_path))
        .collect();
    let mut scans = Vec::new();
    for (name, result) in batch_scan(scanner, items, concurrency).await {
        let scan = match result {
            Ok(result) => {
                installer.record_scan(&name, &result)?;
                InstalledScan {
                    flagged: result.blocks_at(threshold),
                    severity: Some(result.severity),
                    findings: result.findings.len(),
                    error: None,
                    name,
                }
            }
            Err(err) => {
                tracing::warn!(skill = %name, error = %err, "Scan failed");
                InstalledScan {
                    name,
                    severity: None,
                    findings: 0,
                    flagged: false,
                    error: Some(err.to_string()),
                }
            }
        };
        scans.push(scan);
    }
    Ok(scans)
}
