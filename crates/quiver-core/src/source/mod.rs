//! Source resolution for skill packages.
//!
//! Turns a user-supplied string into a [`SkillSource`]. Handles:
//! - Prefixed sources (`local:`, `github:`, `git:`)
//! - Full URLs (git repositories and `.skill`/`.zip` archives)
//! - Filesystem paths (directories and archives)
//! - `owner/repo` GitHub shorthand

mod resolver;
mod spec;

pub use resolver::SourceResolver;
pub use spec::{SkillSource, SourceKind, is_archive_name};

// Re-export GitSpec from git module for convenience
pub use crate::git::GitSpec;
