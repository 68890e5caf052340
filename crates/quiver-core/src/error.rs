//! Error taxonomy for the acquisition and installation pipeline.
//!
//! Stage errors abort a workflow run; per-candidate errors (validation,
//! individual install failures) are collected into the final report instead.

use serde::{Deserialize, Serialize};

/// Exit code for a successful run.
pub const EXIT_OK: i32 = 0;
/// Exit code for resolution, validation, and other non-timeout failures.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a workflow suspended on a pending risk decision.
pub const EXIT_BLOCKED: i32 = 2;
/// Exit code for a subprocess that exceeded its wall-clock timeout.
pub const EXIT_TIMEOUT: i32 = 3;

/// One failed clone attempt against a mirror or the canonical origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneAttempt {
    /// URL the attempt cloned from
    pub url: String,
    /// Why it failed
    pub reason: String,
    /// Whether the attempt was killed by its timeout
    pub timed_out: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot resolve source '{input}': {reason}")]
    SourceResolution { input: String, reason: String },

    #[error("clone of '{source_url}' failed after {} attempt(s): {}", .attempts.len(), summarize_attempts(.attempts))]
    Clone {
        source_url: String,
        attempts: Vec<CloneAttempt>,
    },

    #[error("no skill candidates found in '{source_name}'")]
    NoCandidates { source_name: String },

    #[error("candidate '{candidate}' failed validation: {reason}")]
    Validation { candidate: String, reason: String },

    #[error("security scan of '{candidate}' failed: {reason}")]
    ScanEngine { candidate: String, reason: String },

    #[error("cannot resume workflow '{workflow_id}': {reason}")]
    ResumeMismatch { workflow_id: String, reason: String },

    #[error("skill '{name}' is already installed or registered (use --force to overwrite)")]
    RegistryConflict { name: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("skill '{name}' is not installed")]
    NotFound { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    pub fn validation(candidate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            candidate: candidate.into(),
            reason: reason.into(),
        }
    }

    pub fn source_resolution(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceResolution {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn resume_mismatch(workflow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResumeMismatch {
            workflow_id: workflow_id.into(),
            reason: reason.into(),
        }
    }

    /// Identity of the offending source, candidate, or workflow, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::SourceResolution { input, .. } => Some(input),
            Self::Clone { source_url, .. } => Some(source_url),
            Self::NoCandidates { source_name } => Some(source_name),
            Self::Validation { candidate, .. } | Self::ScanEngine { candidate, .. } => {
                Some(candidate)
            }
            Self::ResumeMismatch { workflow_id, .. } => Some(workflow_id),
            Self::RegistryConflict { name } | Self::NotFound { name } => Some(name),
            Self::Timeout { operation, .. } => Some(operation),
            Self::Io(_) | Self::Other(_) => None,
        }
    }

    /// Whether retrying (possibly with different flags) can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Clone { .. }
                | Self::ScanEngine { .. }
                | Self::Timeout { .. }
                | Self::RegistryConflict { .. }
                | Self::Io(_)
        )
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Timeout { .. } => EXIT_TIMEOUT,
            _ => EXIT_FAILURE,
        }
    }

    /// Stable machine-readable kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceResolution { .. } => "source_resolution",
            Self::Clone { .. } => "clone",
            Self::NoCandidates { .. } => "no_candidates",
            Self::Validation { .. } => "validation",
            Self::ScanEngine { .. } => "scan_engine",
            Self::ResumeMismatch { .. } => "resume_mismatch",
            Self::RegistryConflict { .. } => "registry_conflict",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

fn summarize_attempts(attempts: &[CloneAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.url, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
