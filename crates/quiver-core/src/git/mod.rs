//! Git operations for acquiring remote skill repositories.
//!
//! Clones are shallow (`--depth 1`) and run as subprocesses with a hard
//! timeout per attempt. Configured mirrors are tried before the canonical
//! origin.

mod fetcher;
mod spec;

pub use fetcher::{render_mirror, CloneOutcome, GitFetcher};
pub use spec::GitSpec;

#[cfg(test)]
mod tests;
