//! Workflow state and its transitions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::scan::{Finding, ScanResult, Severity};
use crate::skills::{NormalizedSkill, RejectedCandidate, normalize_name};
use crate::source::SkillSource;

/// Position in the install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    Resolving,
    Cloning,
    Normalizing,
    Scanning,
    AwaitingDecision,
    Installing,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Resolving => "resolving",
            Self::Cloning => "cloning",
            Self::Normalizing => "normalizing",
            Self::Scanning => "scanning",
            Self::AwaitingDecision => "awaiting_decision",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the machine may move from `self` to `next`.
    ///
    /// Any live stage may fail. `AwaitingDecision` may repeat when a resume
    /// leaves candidates undecided.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Created, Resolving)
            | (Resolving, Cloning)
            | (Cloning, Normalizing)
            | (Normalizing, Scanning)
            | (Scanning, Installing)
            | (Scanning, AwaitingDecision)
            | (AwaitingDecision, AwaitingDecision)
            | (AwaitingDecision, Installing)
            | (Installing, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

/// What to do with a candidate the scanner blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Install despite the findings
    Keep,
    /// Drop the candidate from this install
    Uninstall,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Uninstall => "uninstall",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "install" => Ok(Self::Keep),
            "uninstall" | "skip" | "drop" => Ok(Self::Uninstall),
            other => anyhow::bail!("Unknown decision '{}' (expected keep or uninstall)", other),
        }
    }
}

/// Everything a caller supplies to start a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub input: String,
    /// Install only the candidate with this name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub refresh_cache: bool,
    /// Decisions applied to blocked candidates without suspending
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub decisions: BTreeMap<String, Decision>,
}

impl InstallRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill = Some(skill.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh_cache = refresh;
        self
    }

    pub fn with_decision(mut self, name: impl AsRef<str>, decision: Decision) -> Self {
        self.decisions.insert(normalize_name(name.as_ref()), decision);
        self
    }
}

/// A candidate held back by its scan result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedCandidate {
    pub name: String,
    pub severity: Severity,
    pub findings: Vec<Finding>,
}

/// Durable state of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub request: InstallRequest,
    pub stage: Stage,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SkillSource>,
    /// Where candidates are staged; survives suspension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub candidates: Vec<NormalizedSkill>,
    #[serde(default)]
    pub rejected: Vec<RejectedCandidate>,
    #[serde(default)]
    pub scan_results: BTreeMap<String, ScanResult>,
    /// Blocked candidates still waiting for a decision
    #[serde(default)]
    pub pending_decisions: BTreeMap<String, Severity>,
    #[serde(default)]
    pub decision_log: BTreeMap<String, Decision>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(request: InstallRequest) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: uuid::Uuid::new_v4().simple().to_string(),
            request,
            stage: Stage::Created,
            status: WorkflowStatus::Running,
            source: None,
            staging_dir: None,
            candidates: Vec::new(),
            rejected: Vec::new(),
            scan_results: BTreeMap::new(),
            pending_decisions: BTreeMap::new(),
            decision_log: BTreeMap::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing transitions the machine does not allow.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance_to(next) {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "workflow {}: invalid transition {} -> {}",
                self.workflow_id,
                self.stage,
                next
            )));
        }
        tracing::debug!(workflow_id = %self.workflow_id, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Pending candidates with their findings, sorted by name.
    pub fn blocked(&self) -> Vec<BlockedCandidate> {
        self.pending_decisions
            .iter()
            .map(|(name, severity)| BlockedCandidate {
                name: name.clone(),
                severity: *severity,
                findings: self
                    .scan_results
                    .get(name)
                    .map(|r| r.findings.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Record decisions for pending candidates.
    ///
    /// Every name must be pending; otherwise nothing is applied.
    pub fn apply_decisions(&mut self, decisions: &BTreeMap<String, Decision>) -> Result<()> {
        let normalized: BTreeMap<String, Decision> = decisions
            .iter()
            .map(|(name, decision)| (normalize_name(name), *decision))
            .collect();
        let unknown: Vec<&str> = normalized
            .keys()
            .filter(|name| !self.pending_decisions.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineError::resume_mismatch(
                &self.workflow_id,
                format!("no pending decision for: {}", unknown.join(", ")),
            ));
        }
        for (name, decision) in normalized {
            tracing::info!(workflow_id = %self.workflow_id, skill = %name, %decision, "Decision recorded");
            self.pending_decisions.remove(&name);
            self.decision_log.insert(name, decision);
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
