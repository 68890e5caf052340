//! Git source specification types.

use serde::{Deserialize, Serialize};

/// Specification for a git source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSpec {
    /// Repository URL (e.g., "https://github.com/org/repo")
    pub repo_url: String,
    /// Git reference (branch or tag)
    pub reference: Option<String>,
    /// Subdirectory within the repository
    pub subdir: Option<String>,
}

impl GitSpec {
    /// Create a new GitSpec with just a repo URL.
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            reference: None,
            subdir: None,
        }
    }

    /// Set the git reference (branch or tag).
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Set the subdirectory path.
    pub fn with_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    /// Parse a git source string into a GitSpec.
    ///
    /// Supports formats:
    /// - `git:https://github.com/org/repo`
    /// - `github:org/repo`
    /// - `github:org/repo@ref`
    /// - `github:org/repo@ref/path`
    /// - `https://github.com/org/repo/tree/ref/path`
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let raw = source.strip_prefix("git:").unwrap_or(source);
        if let Some(shorthand) = raw.strip_prefix("github:") {
            return Self::parse_github_shorthand(shorthand);
        }

        if let Some((repo, reference, subdir)) = Self::split_tree_path(raw) {
            if reference.is_empty() {
                anyhow::bail!("Git URL is missing a ref after /tree/");
            }
            let mut spec = Self::new(repo).with_reference(reference);
            if !subdir.is_empty() {
                spec = spec.with_subdir(subdir);
            }
            return Ok(spec);
        }

        if raw.trim().is_empty() {
            anyhow::bail!("Git source is empty");
        }
        Ok(Self::new(raw.trim_end_matches('/')))
    }

    /// Parse github shorthand like "org/repo@ref/path".
    fn parse_github_shorthand(shorthand: &str) -> anyhow::Result<Self> {
        let (repo_part, rest) = match shorthand.split_once('@') {
            Some((repo, rest)) => (repo, Some(rest)),
            None => (shorthand, None),
        };
        let segments: Vec<&str> = repo_part.split('/').collect();
        if segments.len() < 2 || segments[..2].iter().any(|s| s.is_empty()) {
            anyhow::bail!("Expected github:owner/repo, got github:{}", shorthand);
        }

        let mut spec = Self::new(format!(
            "https://github.com/{}/{}",
            segments[0], segments[1]
        ));
        // github:owner/repo/sub/path (no ref)
        if segments.len() > 2 && rest.is_none() {
            spec = spec.with_subdir(segments[2..].join("/"));
        }
        if let Some(rest) = rest {
            match rest.split_once('/') {
                Some((reference, path)) => {
                    spec = spec.with_reference(reference);
                    if !path.is_empty() {
                        spec = spec.with_subdir(path.trim_end_matches('/'));
                    }
                }
                None if !rest.is_empty() => spec = spec.with_reference(rest),
                None => {}
            }
        }
        Ok(spec)
    }

    /// Split a URL with /tree/ pattern into (repo, ref, subdir).
    fn split_tree_path(raw: &str) -> Option<(String, String, String)> {
        let marker = "/tree/";
        let idx = raw.find(marker)?;
        let repo = raw[..idx].to_string();
        let rest = &raw[idx + marker.len()..];
        let mut parts = rest.splitn(2, '/');
        let reference = parts.next()?.to_string();
        let subdir = parts.next().unwrap_or("").trim_end_matches('/').to_string();
        Some((repo, reference, subdir))
    }

    /// `(owner, repo)` taken from the last two path segments of the URL.
    ///
    /// Works for `https://host/owner/repo(.git)`, `git@host:owner/repo.git`
    /// and `file:///any/path/owner/repo`.
    pub fn owner_repo(&self) -> Option<(String, String)> {
        let url = self.repo_url.trim_end_matches('/');
        let path = match url.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => url.rsplit_once(':').map(|(_, p)| p).unwrap_or(url),
        };
        let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
        let repo = segments.next()?.trim_end_matches(".git");
        let owner = segments.next()?;
        if repo.is_empty() {
            return None;
        }
        Some((owner.to_string(), repo.to_string()))
    }

    /// Cache directory name: `owner__repo__ref__<digest>`.
    ///
    /// The digest covers the URL and ref so distinct hosts never collide.
    pub fn cache_key(&self) -> String {
        let (owner, repo) = self
            .owner_repo()
            .unwrap_or_else(|| ("_".to_string(), "repo".to_string()));
        let reference = self.reference.as_deref().unwrap_or("HEAD");
        let digest_input = format!("{}#{}", self.repo_url, reference);
        let digest = blake3::hash(digest_input.as_bytes()).to_hex();
        format!(
            "{}__{}__{}__{}",
            sanitize_segment(&owner),
            sanitize_segment(&repo),
            sanitize_segment(reference),
            &digest.as_str()[..12]
        )
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
