//! Quiver Core Library
//!
//! Acquires skill packages from git repositories, local directories and
//! archives, normalizes them into one canonical layout, gates them behind
//! an external security scanner, and installs them into a runtime skills
//! directory backed by a searchable registry.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod formats;
pub mod fs;
pub mod git;
pub mod registry;
pub mod scan;
pub mod skills;
pub mod source;
pub mod workflow;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, QuiverConfig};
    pub use crate::context::AppContext;

    // Errors
    pub use crate::error::{PipelineError, Result};

    // Sources and formats
    pub use crate::formats::{SkillCandidate, SkillFormat};
    pub use crate::source::{SkillSource, SourceKind};

    // Skills
    pub use crate::skills::{NormalizedSkill, PackageType};

    // Scanning
    pub use crate::scan::{ScanResult, SecurityScanner, Severity};

    // Registry
    pub use crate::registry::{SearchHit, SkillInstaller, SkillRecord, search};

    // Workflow
    pub use crate::workflow::{Decision, InstallRequest, InstallWorkflow, WorkflowOutcome};
}
