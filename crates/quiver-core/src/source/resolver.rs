//! Source resolver implementation.

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::git::GitSpec;

use super::spec::{SkillSource, is_archive_name};

const URL_PREFIXES: [&str; 4] = ["http://", "https://", "file://", "git@"];

/// Resolves source strings into [`SkillSource`]s.
///
/// Pure apart from filesystem existence checks.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    /// Project root for resolving relative paths
    project_root: PathBuf,
}

impl SourceResolver {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    /// Resolve a source string.
    ///
    /// Shapes are checked in order: `local:` prefix, `github:`/`git:`
    /// prefixes, full URLs, filesystem paths, `owner/repo` shorthand.
    pub fn resolve(&self, input: &str) -> Result<SkillSource> {
        let source = input.trim();
        if source.is_empty() {
            return Err(PipelineError::source_resolution(input, "source is empty"));
        }

        if let Some(path) = source.strip_prefix("local:") {
            let resolved = self.expand_path(path).map_err(|e| {
                PipelineError::source_resolution(input, e.to_string())
            })?;
            return self.resolve_path(input, resolved);
        }

        if source.starts_with("github:") || source.starts_with("git:") {
            return self.resolve_git(input, source);
        }

        if URL_PREFIXES.iter().any(|p| source.starts_with(p)) {
            if is_archive_name(source) {
                return Ok(SkillSource::package(source));
            }
            return self.resolve_git(input, source);
        }

        if is_explicit_path(source) {
            let resolved = self.expand_path(source).map_err(|e| {
                PipelineError::source_resolution(input, e.to_string())
            })?;
            return self.resolve_path(input, resolved);
        }

        let relative = self.project_root.join(source);
        if relative.exists() {
            return self.resolve_path(input, relative);
        }

        if let Some((owner, repo)) = parse_shorthand(source) {
            tracing::debug!(owner, repo, "Resolved GitHub shorthand");
            return Ok(SkillSource::remote(GitSpec::new(format!(
                "https://github.com/{}/{}",
                owner, repo
            ))));
        }

        Err(PipelineError::source_resolution(
            input,
            "expected a URL, a path, github:owner/repo, or owner/repo",
        ))
    }

    fn resolve_git(&self, input: &str, source: &str) -> Result<SkillSource> {
        let spec = GitSpec::parse(source)
            .map_err(|e| PipelineError::source_resolution(input, e.to_string()))?;
        Ok(SkillSource::remote(spec))
    }

    fn resolve_path(&self, input: &str, path: PathBuf) -> Result<SkillSource> {
        if path.is_dir() {
            return Ok(SkillSource::local(path));
        }
        if path.is_file() {
            let name = path.to_string_lossy();
            if is_archive_name(&name) {
                return Ok(SkillSource::package(name.into_owned()));
            }
            return Err(PipelineError::source_resolution(
                input,
                format!(
                    "{} is a file but not a .skill or .zip package",
                    path.display()
                ),
            ));
        }
        Err(PipelineError::source_resolution(
            input,
            format!("path does not exist: {}", path.display()),
        ))
    }

    /// Expand `~/`, absolute and project-relative paths.
    fn expand_path(&self, path: &str) -> anyhow::Result<PathBuf> {
        if let Some(rest) = path.strip_prefix("~/") {
            return Ok(dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
                .join(rest));
        }
        let as_path = Path::new(path);
        if as_path.is_absolute() {
            return Ok(as_path.to_path_buf());
        }
        let stripped = path.strip_prefix("./").unwrap_or(path);
        Ok(self.project_root.join(stripped))
    }
}

fn is_explicit_path(source: &str) -> bool {
    source.starts_with('/')
        || source.starts_with("./")
        || source.starts_with("../")
        || source.starts_with("~/")
        || source == "."
        || source == ".."
}

/// `owner/repo`: exactly two non-empty segments, no scheme or backslash.
fn parse_shorthand(source: &str) -> Option<(&str, &str)> {
    if source.contains(':') || source.contains('\\') {
        return None;
    }
    let (owner, repo) = source.split_once('/')?;
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    (valid(owner) && valid(repo)).then_some((owner, repo.trim_end_matches(".git")))
}
