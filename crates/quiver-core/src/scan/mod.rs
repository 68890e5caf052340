//! Security scanning of skill content.
//!
//! The scanning engine is an external classifier run as a subprocess. It
//! receives a directory and prints a JSON verdict; quiver only interprets
//! the verdict and decides whether a candidate blocks installation.

mod external;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{PipelineError, Result};

pub use external::ExternalScanner;

/// Scanner verdict levels, ordered from harmless to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    /// Case-insensitive. `SAFE` and `none` map to [`Severity::Info`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "safe" | "none" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => anyhow::bail!("unrecognised severity '{}'", other),
        }
    }
}

/// One issue reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Verdict for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub severity: Severity,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl ScanResult {
    pub fn clean() -> Self {
        Self::default()
    }

    /// Whether this verdict suspends installation at `threshold`.
    pub fn blocks_at(&self, threshold: Severity) -> bool {
        self.severity >= threshold
    }
}

/// Classifies a skill directory.
#[async_trait]
pub trait SecurityScanner: Send + Sync {
    /// Scan `dir`; `name` identifies the candidate in errors.
    async fn scan(&self, name: &str, dir: &Path) -> Result<ScanResult>;
}

/// Scan many directories with at most `concurrency` scans in flight.
///
/// Results come back in input order. One failed scan does not affect the
/// others.
pub async fn batch_scan(
    scanner: Arc<dyn SecurityScanner>,
    items: Vec<(String, PathBuf)>,
    concurrency: usize,
) -> Vec<(String, Result<ScanResult>)> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, (name, dir)) in items.iter().cloned().enumerate() {
        let scanner = Arc::clone(&scanner);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => scanner.scan(&name, &dir).await,
                Err(_) => Err(PipelineError::ScanEngine {
                    candidate: name.clone(),
                    reason: "scan pool closed".to_string(),
                }),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<ScanResult>>> = (0..items.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!(error = %e, "Scan task panicked"),
        }
    }

    items
        .into_iter()
        .zip(slots)
        .map(|((name, _), slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(PipelineError::ScanEngine {
                    candidate: name.clone(),
                    reason: "scan task did not complete".to_string(),
                })
            });
            (name, result)
        })
        .collect()
}
