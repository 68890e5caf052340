//! Git fetcher: shallow clones through mirrors, then the canonical origin.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::CloneConfig;
use crate::error::{CloneAttempt, PipelineError, Result};

use super::GitSpec;

/// Result of a successful clone.
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    /// URL the successful attempt cloned from
    pub cloned_from: String,
    /// Resolved HEAD commit SHA, when readable
    pub commit: Option<String>,
    /// Attempts that failed before the successful one
    pub failed_attempts: Vec<CloneAttempt>,
}

/// Clones git repositories with per-attempt timeouts.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    mirrors: Vec<String>,
    mirror_timeout: Duration,
    origin_timeout: Duration,
}

struct PlannedAttempt {
    url: String,
    timeout: Duration,
    is_origin: bool,
}

impl GitFetcher {
    pub fn new(config: &CloneConfig) -> Self {
        Self {
            mirrors: config.mirrors.clone(),
            mirror_timeout: Duration::from_secs(config.mirror_timeout_secs),
            origin_timeout: Duration::from_secs(config.origin_timeout_secs),
        }
    }

    /// Clone `spec` into `dest` (which must not exist yet).
    ///
    /// Mirrors are tried in configured order, the canonical origin last. A
    /// failed attempt leaves nothing behind at `dest`.
    pub async fn clone_into(&self, spec: &GitSpec, dest: &Path) -> Result<CloneOutcome> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut failed = Vec::new();
        let mut origin_timed_out = false;

        for attempt in self.plan(spec) {
            tracing::info!(url = %attempt.url, origin = attempt.is_origin, "Cloning repository");
            match Self::run_clone(&attempt.url, spec.reference.as_deref(), dest, attempt.timeout)
                .await
            {
                Ok(()) => {
                    let commit = Self::head_commit(dest);
                    tracing::debug!(url = %attempt.url, commit = ?commit, "Clone succeeded");
                    return Ok(CloneOutcome {
                        cloned_from: attempt.url,
                        commit,
                        failed_attempts: failed,
                    });
                }
                Err(failure) => {
                    tracing::warn!(url = %attempt.url, reason = %failure.reason, "Clone attempt failed");
                    remove_partial(dest).await;
                    if attempt.is_origin && failure.timed_out {
                        origin_timed_out = true;
                    }
                    failed.push(failure);
                }
            }
        }

        if origin_timed_out {
            return Err(PipelineError::Timeout {
                operation: format!("git clone {}", spec.repo_url),
                secs: self.origin_timeout.as_secs(),
            });
        }
        Err(PipelineError::Clone {
            source_url: spec.repo_url.clone(),
            attempts: failed,
        })
    }

    fn plan(&self, spec: &GitSpec) -> Vec<PlannedAttempt> {
        let mut attempts = Vec::new();
        if is_network_url(&spec.repo_url) {
            for template in &self.mirrors {
                match render_mirror(template, spec) {
                    Some(url) if url != spec.repo_url => attempts.push(PlannedAttempt {
                        url,
                        timeout: self.mirror_timeout,
                        is_origin: false,
                    }),
                    Some(_) => {}
                    None => tracing::debug!(template, "Mirror template not applicable"),
                }
            }
        }
        attempts.push(PlannedAttempt {
            url: spec.repo_url.clone(),
            timeout: self.origin_timeout,
            is_origin: true,
        });
        attempts
    }

    async fn run_clone(
        url: &str,
        reference: Option<&str>,
        dest: &Path,
        timeout: Duration,
    ) -> std::result::Result<(), CloneAttempt> {
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg("--depth").arg("1");
        if let Some(reference) = reference {
            cmd.arg("--branch").arg(reference);
        }
        cmd.arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let failure = |reason: String, timed_out: bool| CloneAttempt {
            url: url.to_string(),
            reason,
            timed_out,
        };

        let child = cmd
            .spawn()
            .map_err(|e| failure(format!("failed to spawn git: {}", e), false))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => Err(failure(
                format!("timed out after {}s", timeout.as_secs()),
                true,
            )),
            Ok(Err(e)) => Err(failure(format!("failed to wait for git: {}", e), false)),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let last_line = stderr.lines().last().unwrap_or("").trim().to_string();
                Err(failure(
                    format!(
                        "git exited with {}: {}",
                        output.status.code().unwrap_or(-1),
                        last_line
                    ),
                    false,
                ))
            }
        }
    }

    /// Read the HEAD commit of a checkout.
    pub fn head_commit(repo_dir: &Path) -> Option<String> {
        let repo = git2::Repository::open(repo_dir).ok()?;
        let head = repo.head().ok()?;
        let commit = head.peel_to_commit().ok()?;
        Some(commit.id().to_string())
    }
}

/// Expand a mirror template for `spec`.
///
/// Returns `None` when the template needs owner/repo and the URL has none.
pub fn render_mirror(template: &str, spec: &GitSpec) -> Option<String> {
    let mut rendered = template.replace("{url}", &spec.repo_url);
    let needs_parts = ["{repo}", "{owner}", "{name}"]
        .iter()
        .any(|p| rendered.contains(p));
    if needs_parts {
        let (owner, name) = spec.owner_repo()?;
        rendered = rendered
            .replace("{repo}", &format!("{}/{}", owner, name))
            .replace("{owner}", &owner)
            .replace("{name}", &name);
    }
    Some(rendered)
}

fn is_network_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || url.starts_with("git@")
}

async fn remove_partial(dest: &Path) {
    if tokio::fs::metadata(dest).await.is_ok() {
        if let Err(e) = tokio::fs::remove_dir_all(dest).await {
            tracing::warn!(path = %dest.display(), error = %e, "Failed to remove partial clone");
        }
    }
}
