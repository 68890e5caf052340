//! Source specification types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::git::GitSpec;

/// Extensions recognised as packaged skill archives.
const ARCHIVE_EXTENSIONS: [&str; 2] = ["skill", "zip"];

/// How a source is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Git repository, cloned into the cache
    Remote,
    /// Directory on the local filesystem, used in place
    Local,
    /// Zip archive, local or downloaded, extracted into the cache
    Package,
}

/// A resolved source. Immutable once produced by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSource {
    pub kind: SourceKind,
    /// URL for remote sources and remote packages, absolute path otherwise
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

impl SkillSource {
    pub fn remote(spec: GitSpec) -> Self {
        Self {
            kind: SourceKind::Remote,
            location: spec.repo_url,
            reference: spec.reference,
            subdir: spec.subdir,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SourceKind::Local,
            location: path.into().to_string_lossy().into_owned(),
            reference: None,
            subdir: None,
        }
    }

    pub fn package(location: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Package,
            location: location.into(),
            reference: None,
            subdir: None,
        }
    }

    /// Git spec for remote sources.
    pub fn git_spec(&self) -> Option<GitSpec> {
        (self.kind == SourceKind::Remote).then(|| GitSpec {
            repo_url: self.location.clone(),
            reference: self.reference.clone(),
            subdir: self.subdir.clone(),
        })
    }

    /// Filesystem path for local sources and local packages.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.kind {
            SourceKind::Local => Some(PathBuf::from(&self.location)),
            SourceKind::Package if !self.is_url() => Some(PathBuf::from(&self.location)),
            SourceKind::Package => self
                .location
                .starts_with("file://")
                .then(|| url::Url::parse(&self.location).ok()?.to_file_path().ok())
                .flatten(),
            SourceKind::Remote => None,
        }
    }

    pub fn is_url(&self) -> bool {
        self.location.contains("://") || self.location.starts_with("git@")
    }

    /// Short human-readable name (`owner/repo`, archive or directory name).
    pub fn display_name(&self) -> String {
        if let Some((owner, repo)) = self.git_spec().and_then(|s| s.owner_repo()) {
            return format!("{}/{}", owner, repo);
        }
        let trimmed = self.location.trim_end_matches('/');
        Path::new(trimmed)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.location.clone())
    }

    /// Name for a skill found at the top of this source: the subdirectory,
    /// repository, directory or archive stem, in that order.
    pub fn root_name(&self) -> String {
        if let Some(last) = self
            .subdir
            .as_deref()
            .and_then(|s| s.trim_end_matches('/').rsplit('/').next())
            .filter(|s| !s.is_empty())
        {
            return last.to_string();
        }
        if let Some((_, repo)) = self.git_spec().and_then(|s| s.owner_repo()) {
            return repo;
        }
        let name = self.display_name();
        if self.kind == SourceKind::Package && is_archive_name(&name) {
            let without_query = name.split(['?', '#']).next().unwrap_or(&name);
            if let Some(stem) = Path::new(without_query).file_stem() {
                return stem.to_string_lossy().into_owned();
            }
        }
        name
    }
}

impl std::fmt::Display for SkillSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(reference) = &self.reference {
            write!(f, "@{}", reference)?;
        }
        if let Some(subdir) = &self.subdir {
            write!(f, " ({})", subdir)?;
        }
        Ok(())
    }
}

/// Whether a file name or URL path ends in a skill archive extension.
pub fn is_archive_name(name: &str) -> bool {
    let without_query = name.split(['?', '#']).next().unwrap_or(name);
    Path::new(without_query)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
