//! The install workflow engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::RepoCache;
use crate::config::QuiverConfig;
use crate::error::{EXIT_BLOCKED, EXIT_FAILURE, EXIT_OK, PipelineError, Result};
use crate::formats::FormatDetector;
use crate::registry::SkillInstaller;
use crate::scan::{SecurityScanner, Severity, batch_scan};
use crate::skills::{NormalizedSkill, Normalizer, PackageType, RejectedCandidate, normalize_name};
use crate::source::SourceResolver;

use super::checkpoint::CheckpointStore;
use super::report::{
    FailedSkill, InstallReport, InstalledSkill, ReportArchive, ReportStatus, SkippedSkill,
};
use super::state::{
    BlockedCandidate, Decision, InstallRequest, Stage, WorkflowState, WorkflowStatus,
};

/// How a `start` or `resume` call ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Installation ran; the report says what happened per skill
    Completed(InstallReport),
    /// Blocked candidates need a decision before anything is installed
    #[serde(rename = "awaiting_decision")]
    Suspended {
        workflow_id: String,
        blocked: Vec<BlockedCandidate>,
    },
}

impl WorkflowOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(report) if report.status == ReportStatus::Failed => EXIT_FAILURE,
            Self::Completed(_) => EXIT_OK,
            Self::Suspended { .. } => EXIT_BLOCKED,
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::Completed(report) => &report.workflow_id,
            Self::Suspended { workflow_id, .. } => workflow_id,
        }
    }
}

/// Summary of a suspended workflow.
#[derive(Debug, Clone, Serialize)]
pub struct PendingWorkflow {
    pub workflow_id: String,
    pub input: String,
    pub blocked: Vec<BlockedCandidate>,
    pub created_at: DateTime<Utc>,
}

/// Drives a source string through resolve, clone, normalize, scan, and
/// install, suspending on blocked candidates.
pub struct InstallWorkflow {
    resolver: SourceResolver,
    cache: RepoCache,
    detector: FormatDetector,
    normalizer: Normalizer,
    scanner: Arc<dyn SecurityScanner>,
    installer: SkillInstaller,
    checkpoints: CheckpointStore,
    reports: ReportArchive,
    staging_root: PathBuf,
    block_threshold: Severity,
    scan_concurrency: usize,
}

impl InstallWorkflow {
    pub fn new(
        config: &QuiverConfig,
        state_dir: &Path,
        resolver: SourceResolver,
        cache: RepoCache,
        installer: SkillInstaller,
        scanner: Arc<dyn SecurityScanner>,
    ) -> Self {
        Self {
            resolver,
            cache,
            detector: FormatDetector::new(config.detect.max_depth),
            normalizer: Normalizer::new(),
            scanner,
            installer,
            checkpoints: CheckpointStore::new(state_dir),
            reports: ReportArchive::new(state_dir),
            staging_root: state_dir.join("staging"),
            block_threshold: config.scan.block_threshold,
            scan_concurrency: config.scan.concurrency,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn reports(&self) -> &ReportArchive {
        &self.reports
    }

    /// Run a new workflow until it completes, fails, or suspends.
    pub async fn start(&self, request: InstallRequest) -> Result<WorkflowOutcome> {
        let mut state = WorkflowState::new(request);
        tracing::info!(
            workflow_id = %state.workflow_id,
            input = %state.request.input,
            "Starting install workflow"
        );
        match self.run_until_decision(&mut state).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.fail(&mut state, &err);
                Err(err)
            }
        }
    }

    /// Continue a suspended workflow with decisions for its blocked candidates.
    ///
    /// Candidates left undecided keep the workflow suspended. The checkpoint
    /// is held for the duration of the call and only dropped once the install
    /// report is archived; on failure it is put back for another attempt.
    pub async fn resume(
        &self,
        workflow_id: &str,
        decisions: &BTreeMap<String, Decision>,
    ) -> Result<WorkflowOutcome> {
        let Some((claim, mut state)) = self.checkpoints.claim(workflow_id)? else {
            let reason = if self.checkpoints.is_claimed(workflow_id) {
                "workflow is already being resumed"
            } else {
                "no suspended workflow with this id"
            };
            return Err(PipelineError::resume_mismatch(workflow_id, reason));
        };

        match self.continue_suspended(&mut state, decisions) {
            Ok(outcome) => {
                if let Err(err) = self.checkpoints.consume(claim) {
                    tracing::warn!(workflow_id, error = %format!("{:#}", err), "Failed to drop resumed checkpoint");
                }
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(
                    workflow_id,
                    error = %err,
                    recoverable = err.is_recoverable(),
                    "Resume failed, workflow stays suspended"
                );
                if let Err(release_err) = self.checkpoints.release(claim) {
                    tracing::error!(workflow_id, error = %format!("{:#}", release_err), "Failed to restore checkpoint");
                }
                Err(err)
            }
        }
    }

    fn continue_suspended(
        &self,
        state: &mut WorkflowState,
        decisions: &BTreeMap<String, Decision>,
    ) -> Result<WorkflowOutcome> {
        if state.stage != Stage::AwaitingDecision {
            return Err(PipelineError::resume_mismatch(
                &state.workflow_id,
                format!("workflow is {}, not awaiting a decision", state.stage),
            ));
        }

        state.apply_decisions(decisions)?;
        if !state.pending_decisions.is_empty() {
            return self.suspend(state);
        }

        tracing::info!(workflow_id = %state.workflow_id, "All decisions made, resuming install");
        self.install_stage(state)
    }

    /// Suspended workflows, oldest first.
    pub fn pending(&self) -> Result<Vec<PendingWorkflow>> {
        Ok(self
            .checkpoints
            .list()?
            .into_iter()
            .map(|state| PendingWorkflow {
                blocked: state.blocked(),
                workflow_id: state.workflow_id,
                input: state.request.input,
                created_at: state.created_at,
            })
            .collect())
    }

    async fn run_until_decision(&self, state: &mut WorkflowState) -> Result<WorkflowOutcome> {
        state.advance(Stage::Resolving)?;
        let source = self.resolver.resolve(&state.request.input)?;
        tracing::info!(source = %source, kind = ?source.kind, "Resolved source");
        state.source = Some(source.clone());

        state.advance(Stage::Cloning)?;
        let root = self.cache.resolve(&source, state.request.refresh_cache).await?;

        state.advance(Stage::Normalizing)?;
        let candidates = self.detector.detect(&root)?;
        if candidates.is_empty() {
            return Err(PipelineError::NoCandidates {
                source_name: source.display_name(),
            });
        }
        let (mut skills, mut rejected) = self.normalizer.plan_all(&candidates, &source.root_name());
        if let Some(filter) = state.request.skill.as_deref() {
            skills.retain(|s| s.matches_name(filter));
            rejected.retain(|r| r.name.as_deref().is_some_and(|n| n == normalize_name(filter)));
            if skills.is_empty() {
                return Err(PipelineError::NoCandidates {
                    source_name: format!("{} (no skill named '{}')", source.display_name(), filter),
                });
            }
        }

        let staging = self.staging_root.join(&state.workflow_id);
        state.staging_dir = Some(staging.clone());
        let mut staged = Vec::with_capacity(skills.len());
        for mut skill in skills {
            match self.normalizer.materialize(&mut skill, &staging) {
                Ok(_) => staged.push(skill),
                Err(err) => {
                    tracing::warn!(skill = %skill.name, error = %err, "Failed to stage candidate");
                    rejected.push(RejectedCandidate {
                        relative_path: skill.relative_path.clone(),
                        name: Some(skill.name.clone()),
                        reason: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            staged = staged.len(),
            rejected = rejected.len(),
            "Normalized candidates"
        );
        state.candidates = staged;
        state.rejected = rejected;

        state.advance(Stage::Scanning)?;
        self.scan_stage(state).await?;

        let presets = std::mem::take(&mut state.request.decisions);
        let mut applicable = BTreeMap::new();
        for (name, decision) in &presets {
            let name = normalize_name(name);
            if state.pending_decisions.contains_key(&name) {
                applicable.insert(name, *decision);
            } else {
                state
                    .warnings
                    .push(format!("decision for '{}' ignored: candidate was not blocked", name));
            }
        }
        state.request.decisions = presets;
        state.apply_decisions(&applicable)?;

        if state.pending_decisions.is_empty() {
            self.install_stage(state)
        } else {
            self.suspend(state)
        }
    }

    async fn scan_stage(&self, state: &mut WorkflowState) -> Result<()> {
        let items: Vec<(String, PathBuf)> = state
            .candidates
            .iter()
            .filter_map(|s| s.content_dir.clone().map(|dir| (s.name.clone(), dir)))
            .collect();
        let results = batch_scan(Arc::clone(&self.scanner), items, self.scan_concurrency).await;

        for (name, result) in results {
            let result = result?;
            if result.blocks_at(self.block_threshold) {
                tracing::warn!(
                    skill = %name,
                    severity = %result.severity,
                    findings = result.findings.len(),
                    "Candidate blocked by security scan"
                );
                state.pending_decisions.insert(name.clone(), result.severity);
            } else {
                tracing::debug!(skill = %name, severity = %result.severity, "Scan passed");
            }
            state.scan_results.insert(name, result);
        }
        Ok(())
    }

    fn suspend(&self, state: &mut WorkflowState) -> Result<WorkflowOutcome> {
        state.advance(Stage::AwaitingDecision)?;
        state.status = WorkflowStatus::Suspended;
        self.checkpoints.save(state)?;
        let blocked = state.blocked();
        tracing::info!(
            workflow_id = %state.workflow_id,
            blocked = blocked.len(),
            "Workflow suspended awaiting decision"
        );
        Ok(WorkflowOutcome::Suspended {
            workflow_id: state.workflow_id.clone(),
            blocked,
        })
    }

    fn install_stage(&self, state: &mut WorkflowState) -> Result<WorkflowOutcome> {
        state.advance(Stage::Installing)?;
        state.status = WorkflowStatus::Running;

        let source = state
            .source
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| state.request.input.clone());

        let mut ordered: Vec<&NormalizedSkill> = state.candidates.iter().collect();
        ordered.sort_by_key(|s| install_rank(s.package_type));

        let mut installed = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        for skill in ordered {
            if state.decision_log.get(&skill.name) == Some(&Decision::Uninstall) {
                skipped.push(SkippedSkill {
                    name: skill.name.clone(),
                    reason: "uninstall decision after security scan".to_string(),
                });
                continue;
            }

            let scan = state.scan_results.get(&skill.name);
            match self
                .installer
                .install(skill, &source, scan, state.request.force)
            {
                Ok(record) => {
                    let mut warnings = skill.warnings.clone();
                    if record.package_type != skill.package_type {
                        warnings.push(format!(
                            "installed as {}: parent '{}' is not installed",
                            record.package_type,
                            skill.parent_ref.as_deref().unwrap_or("?")
                        ));
                    }
                    installed.push(InstalledSkill {
                        name: record.name,
                        package_type: record.package_type,
                        path: record.installed_path,
                        severity: scan.map(|r| r.severity),
                        warnings,
                    });
                }
                Err(err) => {
                    tracing::warn!(skill = %skill.name, error = %err, "Install failed");
                    failed.push(FailedSkill {
                        name: skill.name.clone(),
                        recoverable: err.is_recoverable(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let status = ReportStatus::from_counts(installed.len(), failed.len() + state.rejected.len());
        let report = InstallReport {
            workflow_id: state.workflow_id.clone(),
            source,
            status,
            installed,
            failed,
            skipped,
            rejected: state.rejected.clone(),
            decisions: state.decision_log.clone(),
            warnings: state.warnings.clone(),
            finished_at: Utc::now(),
        };

        state.advance(Stage::Completed)?;
        state.status = WorkflowStatus::Completed;
        let path = self.reports.save(&report)?;
        self.remove_staging(state);
        tracing::info!(
            workflow_id = %state.workflow_id,
            status = %report.status,
            installed = report.installed.len(),
            failed = report.failure_count(),
            report = %path.display(),
            "Workflow completed"
        );
        Ok(WorkflowOutcome::Completed(report))
    }

    fn fail(&self, state: &mut WorkflowState, err: &PipelineError) {
        if state.stage.can_advance_to(Stage::Failed) {
            state.stage = Stage::Failed;
        }
        state.status = WorkflowStatus::Failed;
        self.remove_staging(state);
        tracing::error!(
            workflow_id = %state.workflow_id,
            error = %err,
            recoverable = err.is_recoverable(),
            "Workflow failed"
        );
    }

    fn remove_staging(&self, state: &WorkflowState) {
        if let Some(dir) = &state.staging_dir {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to remove staging directory");
                }
            }
        }
    }
}

/// Parents install before their children so children can link to them.
fn install_rank(package_type: PackageType) -> u8 {
    match package_type {
        PackageType::Parent => 0,
        PackageType::Child => 1,
        PackageType::Standalone => 2,
    }
}
