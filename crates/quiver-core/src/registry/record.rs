//! Registry document types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formats::SkillFormat;
use crate::scan::{ScanResult, Severity};
use crate::skills::PackageType;

/// Current registry document version.
pub const REGISTRY_VERSION: u32 = 1;

/// The whole registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    /// Records keyed by lowercase skill name
    #[serde(default)]
    pub skills: BTreeMap<String, SkillRecord>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            skills: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.version > REGISTRY_VERSION {
            anyhow::bail!(
                "Registry version {} is newer than supported version {}",
                self.version,
                REGISTRY_VERSION
            );
        }
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&SkillRecord> {
        self.skills.get(&record_id(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SkillRecord> {
        self.skills.get_mut(&record_id(name))
    }

    /// Installed records whose `parent_ref` names `parent`.
    pub fn children_of(&self, parent: &str) -> Vec<&SkillRecord> {
        self.skills
            .values()
            .filter(|r| {
                r.parent_ref
                    .as_deref()
                    .is_some_and(|p| p.eq_ignore_ascii_case(parent))
            })
            .collect()
    }
}

/// Registry key for a skill name.
pub fn record_id(name: &str) -> String {
    name.to_lowercase()
}

/// Last security verdict recorded for an installed skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub severity: Severity,
    pub findings: usize,
    pub scanned_at: DateTime<Utc>,
}

impl ScanSummary {
    pub fn from_result(result: &ScanResult) -> Self {
        Self {
            severity: result.severity,
            findings: result.findings.len(),
            scanned_at: Utc::now(),
        }
    }
}

/// One installed (or formerly installed) skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: String,
    pub name: String,
    pub folder_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<String>,
    pub installed: bool,
    pub installed_path: PathBuf,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    /// Source string the skill was installed from
    pub source: String,
    pub format: SkillFormat,
    /// Tree hash of the installed directory
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<ScanSummary>,
}
