//! The install workflow: a checkpointed state machine from source string to
//! installed skills, suspending when a security scan blocks a candidate.

mod checkpoint;
mod engine;
mod inspect;
mod report;
mod state;

pub use checkpoint::{CheckpointStore, ClaimedCheckpoint};
pub use engine::{InstallWorkflow, PendingWorkflow, WorkflowOutcome};
pub use inspect::{InstalledScan, ValidationReport, scan_installed, validate_path};
pub use report::{FailedSkill, InstallReport, InstalledSkill, ReportArchive, ReportStatus, SkippedSkill};
pub use state::{BlockedCandidate, Decision, InstallRequest, Stage, WorkflowState, WorkflowStatus};
