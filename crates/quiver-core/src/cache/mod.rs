//! Repository cache for remote clones and extracted packages.
//!
//! Layout under `<state>/cache`:
//!
//! ```text
//! repos/<owner>__<repo>__<ref>__<digest>/.quiver-cache.json
//! repos/<owner>__<repo>__<ref>__<digest>/checkout/...
//! packages/<digest>/.quiver-cache.json
//! packages/<digest>/content/...
//! ```
//!
//! Entries are only removed by [`RepoCache::clear`]; nothing is evicted in
//! the background.

mod archive;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CacheConfig, CloneConfig};
use crate::error::{PipelineError, Result};
use crate::fs::dir_size;
use crate::git::{GitFetcher, GitSpec};
use crate::source::{SkillSource, SourceKind};

const METADATA_FILE: &str = ".quiver-cache.json";
const CHECKOUT_DIR: &str = "checkout";
const CONTENT_DIR: &str = "content";

/// Metadata written next to every cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub cached_at: DateTime<Utc>,
}

/// Which half of the cache an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEntryKind {
    Repo,
    Package,
}

/// A cache entry as reported by [`RepoCache::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub kind: CacheEntryKind,
    pub path: PathBuf,
    pub url: Option<String>,
    pub commit: Option<String>,
    pub cached_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub age_secs: u64,
}

/// Result of [`RepoCache::clear`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearSummary {
    pub cleared: Vec<String>,
    pub kept: usize,
}

/// Local cache of remote repositories and package archives.
#[derive(Debug, Clone)]
pub struct RepoCache {
    root: PathBuf,
    fetcher: GitFetcher,
    max_age: Option<Duration>,
    download_timeout: Duration,
}

impl RepoCache {
    pub fn new(state_dir: &Path, clone: &CloneConfig, cache: &CacheConfig) -> Self {
        Self {
            root: state_dir.join("cache"),
            fetcher: GitFetcher::new(clone),
            max_age: cache.max_age_hours.map(|h| Duration::from_secs(h * 3600)),
            download_timeout: Duration::from_secs(clone.origin_timeout_secs),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Resolve a source to a directory on disk, applying its `subdir`.
    ///
    /// Local sources are returned in place. Remote sources are cloned (or
    /// served from the cache unless `refresh`). Packages are extracted.
    pub async fn resolve(&self, source: &SkillSource, refresh: bool) -> Result<PathBuf> {
        let root = match source.kind {
            SourceKind::Local => {
                let path = PathBuf::from(&source.location);
                if !path.is_dir() {
                    return Err(PipelineError::source_resolution(
                        &source.location,
                        "local directory no longer exists",
                    ));
                }
                path
            }
            SourceKind::Remote => {
                let spec = source.git_spec().ok_or_else(|| {
                    PipelineError::source_resolution(&source.location, "not a git source")
                })?;
                self.resolve_repo(&spec, refresh).await?
            }
            SourceKind::Package => self.resolve_package(source, refresh).await?,
        };

        match &source.subdir {
            Some(subdir) => {
                let path = root.join(subdir);
                if !path.is_dir() {
                    return Err(PipelineError::source_resolution(
                        source.to_string(),
                        format!("subdirectory '{}' not found in source", subdir),
                    ));
                }
                Ok(path)
            }
            None => Ok(root),
        }
    }

    async fn resolve_repo(&self, spec: &GitSpec, refresh: bool) -> Result<PathBuf> {
        let entry_dir = self.repos_dir().join(spec.cache_key());
        let checkout = entry_dir.join(CHECKOUT_DIR);

        if !refresh && checkout.is_dir() {
            match read_metadata(&entry_dir) {
                Some(meta) if self.is_fresh(&meta) => {
                    tracing::info!(url = %spec.repo_url, path = %checkout.display(), "Cache hit");
                    return Ok(checkout);
                }
                Some(_) => tracing::info!(url = %spec.repo_url, "Cached clone is stale"),
                None => tracing::debug!(url = %spec.repo_url, "Cache entry has no metadata"),
            }
        }

        // Clone beside the live entry so a failed refresh keeps the old one.
        let staging = self
            .repos_dir()
            .join(format!(".tmp-{}-{}", spec.cache_key(), uuid::Uuid::new_v4().simple()));
        let outcome = self.fetcher.clone_into(spec, &staging.join(CHECKOUT_DIR)).await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                remove_dir_quiet(&staging);
                return Err(err);
            }
        };

        let meta = CacheMetadata {
            url: spec.repo_url.clone(),
            reference: spec.reference.clone(),
            commit: outcome.commit,
            cached_at: Utc::now(),
        };
        write_metadata(&staging, &meta)?;

        if entry_dir.exists() {
            std::fs::remove_dir_all(&entry_dir).with_context(|| {
                format!("Failed to remove stale cache entry: {}", entry_dir.display())
            })?;
        }
        std::fs::rename(&staging, &entry_dir).with_context(|| {
            format!("Failed to move clone into cache: {}", entry_dir.display())
        })?;
        tracing::info!(url = %spec.repo_url, from = %outcome.cloned_from, "Cached repository");
        Ok(checkout)
    }

    async fn resolve_package(&self, source: &SkillSource, refresh: bool) -> Result<PathBuf> {
        let local = source.local_path();
        let data = match &local {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("Failed to read skill package: {}", path.display()))?,
            None => archive::download(&source.location, self.download_timeout).await?,
        };

        // Local archives are keyed on content so an edited file re-extracts.
        let digest = match &local {
            Some(_) => blake3::hash(&data),
            None => blake3::hash(source.location.as_bytes()),
        };
        let entry_dir = self.packages_dir().join(&digest.to_hex().as_str()[..16]);
        let content = entry_dir.join(CONTENT_DIR);

        if !refresh && content.is_dir() && read_metadata(&entry_dir).is_some() {
            tracing::info!(package = %source.location, "Package cache hit");
            return Ok(content);
        }
        if entry_dir.exists() {
            std::fs::remove_dir_all(&entry_dir)?;
        }

        let files = archive::extract(&data, &content).map_err(|e| {
            remove_dir_quiet(&entry_dir);
            PipelineError::source_resolution(&source.location, format!("{:#}", e))
        })?;
        write_metadata(
            &entry_dir,
            &CacheMetadata {
                url: source.location.clone(),
                reference: None,
                commit: None,
                cached_at: Utc::now(),
            },
        )?;
        tracing::info!(package = %source.location, files, "Extracted skill package");
        Ok(content)
    }

    fn is_fresh(&self, meta: &CacheMetadata) -> bool {
        let Some(max_age) = self.max_age else {
            return true;
        };
        let age = Utc::now().signed_duration_since(meta.cached_at);
        age.to_std().map(|age| age <= max_age).unwrap_or(true)
    }

    /// All cache entries, repositories first, each sorted by key.
    pub fn list(&self) -> anyhow::Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for (dir, kind) in [
            (self.repos_dir(), CacheEntryKind::Repo),
            (self.packages_dir(), CacheEntryKind::Package),
        ] {
            if !dir.is_dir() {
                continue;
            }
            let mut batch = Vec::new();
            for item in std::fs::read_dir(&dir)
                .with_context(|| format!("Failed to read cache directory: {}", dir.display()))?
            {
                let item = item?;
                let key = item.file_name().to_string_lossy().into_owned();
                if key.starts_with('.') || !item.file_type()?.is_dir() {
                    continue;
                }
                batch.push(describe_entry(&item.path(), key, kind));
            }
            batch.sort_by(|a, b| a.key.cmp(&b.key));
            entries.extend(batch);
        }
        Ok(entries)
    }

    /// Remove entries older than `older_than`, or every entry when `None`.
    pub fn clear(&self, older_than: Option<Duration>) -> anyhow::Result<ClearSummary> {
        let mut summary = ClearSummary::default();
        for entry in self.list()? {
            let expired = older_than.is_none_or(|limit| entry.age_secs > limit.as_secs());
            if !expired {
                summary.kept += 1;
                continue;
            }
            std::fs::remove_dir_all(&entry.path).with_context(|| {
                format!("Failed to remove cache entry: {}", entry.path.display())
            })?;
            tracing::info!(key = %entry.key, "Cleared cache entry");
            summary.cleared.push(entry.key);
        }
        Ok(summary)
    }
}

fn describe_entry(path: &Path, key: String, kind: CacheEntryKind) -> CacheEntry {
    let meta = read_metadata(path);
    let cached_at = meta.as_ref().map(|m| m.cached_at);
    let age_secs = match cached_at {
        Some(at) => Utc::now()
            .signed_duration_since(at)
            .num_seconds()
            .max(0) as u64,
        None => std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };
    CacheEntry {
        key,
        kind,
        path: path.to_path_buf(),
        url: meta.as_ref().map(|m| m.url.clone()),
        commit: meta.and_then(|m| m.commit),
        cached_at,
        size_bytes: dir_size(path),
        age_secs,
    }
}

fn read_metadata(entry_dir: &Path) -> Option<CacheMetadata> {
    let content = std::fs::read_to_string(entry_dir.join(METADATA_FILE)).ok()?;
    match serde_json::from_str(&content) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!(path = %entry_dir.display(), error = %e, "Unreadable cache metadata");
            None
        }
    }
}

fn write_metadata(entry_dir: &Path, meta: &CacheMetadata) -> anyhow::Result<()> {
    std::fs::create_dir_all(entry_dir)?;
    let content = serde_json::to_string_pretty(meta)?;
    std::fs::write(entry_dir.join(METADATA_FILE), content)
        .with_context(|| format!("Failed to write cache metadata in {}", entry_dir.display()))
}

fn remove_dir_quiet(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_dir_all(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to clean up cache staging");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache(state: &Path) -> RepoCache {
        RepoCache::new(state, &CloneConfig::default(), &CacheConfig::default())
    }

    #[tokio::test]
    async fn local_source_resolves_in_place_with_subdir() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("skills/pdf")).unwrap();

        let mut source = SkillSource::local(&src);
        let cache = cache(&temp.path().join("state"));
        assert_eq!(cache.resolve(&source, false).await.unwrap(), src);

        source.subdir = Some("skills/pdf".to_string());
        assert_eq!(
            cache.resolve(&source, false).await.unwrap(),
            src.join("skills/pdf")
        );

        source.subdir = Some("skills/missing".to_string());
        let err = cache.resolve(&source, false).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceResolution { .. }));
    }

    #[tokio::test]
    async fn local_package_is_extracted_once() {
        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("pdf.skill");
        std::fs::write(
            &archive_path,
            archive::tests::build_zip(&[("SKILL.md", "---\nname: pdf\n---\nbody")]),
        )
        .unwrap();

        let cache = cache(&temp.path().join("state"));
        let source = SkillSource::package(archive_path.to_string_lossy());
        let first = cache.resolve(&source, false).await.unwrap();
        assert!(first.join("SKILL.md").exists());
        assert!(first.starts_with(cache.root().join("packages")));

        let second = cache.resolve(&source, false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn clear_respects_age_threshold() {
        let temp = TempDir::new().unwrap();
        let cache = cache(temp.path());
        let old = cache.repos_dir().join("old__repo__HEAD__aaaa");
        let fresh = cache.repos_dir().join("fresh__repo__HEAD__bbbb");
        for (dir, age_days) in [(&old, 10), (&fresh, 0)] {
            write_metadata(
                dir,
                &CacheMetadata {
                    url: "https://github.com/x/y".to_string(),
                    reference: None,
                    commit: None,
                    cached_at: Utc::now() - chrono::Duration::days(age_days),
                },
            )
            .unwrap();
        }

        let summary = cache
            .clear(Some(Duration::from_secs(7 * 24 * 3600)))
            .unwrap();
        assert_eq!(summary.cleared, vec!["old__repo__HEAD__aaaa".to_string()]);
        assert_eq!(summary.kept, 1);
        assert!(fresh.exists());
        assert!(!old.exists());
    }

    #[test]
    fn entry_without_metadata_ages_by_mtime() {
        let temp = TempDir::new().unwrap();
        let cache = cache(temp.path());
        let orphan = cache.packages_dir().join("0123456789abcdef");
        std::fs::create_dir_all(orphan.join(CONTENT_DIR)).unwrap();
        let two_days_ago = SystemTime::now() - Duration::from_secs(2 * 24 * 3600);
        filetime::set_file_mtime(&orphan, filetime::FileTime::from_system_time(two_days_ago))
            .unwrap();

        let entries = cache.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].cached_at.is_none());
        assert!(entries[0].age_secs >= 2 * 24 * 3600 - 60);

        let summary = cache.clear(Some(Duration::from_secs(24 * 3600))).unwrap();
        assert_eq!(summary.cleared.len(), 1);
    }

    #[test]
    fn staleness_follows_max_age() {
        let temp = TempDir::new().unwrap();
        let cache = RepoCache::new(
            temp.path(),
            &CloneConfig::default(),
            &CacheConfig {
                max_age_hours: Some(1),
            },
        );
        let meta = |hours: i64| CacheMetadata {
            url: "u".to_string(),
            reference: None,
            commit: None,
            cached_at: Utc::now() - chrono::Duration::hours(hours),
        };
        assert!(cache.is_fresh(&meta(0)));
        assert!(!cache.is_fresh(&meta(2)));
    }
}
