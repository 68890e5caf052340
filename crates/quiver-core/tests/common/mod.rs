#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use quiver_core::config::QuiverConfig;
use quiver_core::context::AppContext;
use quiver_core::error::{PipelineError, Result};
use quiver_core::scan::{Finding, ScanResult, SecurityScanner, Severity};
use tempfile::TempDir;

/// Scanner with canned verdicts by skill name; everything else is clean.
#[derive(Default)]
pub struct StubScanner {
    verdicts: HashMap<String, Severity>,
    broken: Option<String>,
    stalled: Option<String>,
}

impl StubScanner {
    pub fn clean() -> Arc<dyn SecurityScanner> {
        Arc::new(Self::default())
    }

    pub fn flagging(name: &str, severity: Severity) -> Self {
        Self::default().also(name, severity)
    }

    pub fn also(mut self, name: &str, severity: Severity) -> Self {
        self.verdicts.insert(name.to_string(), severity);
        self
    }

    /// Fail the scan of `name` as if the engine crashed.
    pub fn broken_on(name: &str) -> Arc<dyn SecurityScanner> {
        Arc::new(Self {
            broken: Some(name.to_string()),
            ..Self::default()
        })
    }

    /// Time out the scan of `name` as if the engine hung.
    pub fn stalled_on(name: &str) -> Arc<dyn SecurityScanner> {
        Arc::new(Self {
            stalled: Some(name.to_string()),
            ..Self::default()
        })
    }

    pub fn into_arc(self) -> Arc<dyn SecurityScanner> {
        Arc::new(self)
    }
}

#[async_trait]
impl SecurityScanner for StubScanner {
    async fn scan(&self, name: &str, _dir: &Path) -> Result<ScanResult> {
        if self.broken.as_deref() == Some(name) {
            return Err(PipelineError::ScanEngine {
                candidate: name.to_string(),
                reason: "engine crashed".to_string(),
            });
        }
        if self.stalled.as_deref() == Some(name) {
            return Err(PipelineError::Timeout {
                operation: format!("security scan of '{}'", name),
                secs: 120,
            });
        }
        Ok(match self.verdicts.get(name) {
            Some(severity) => ScanResult {
                severity: *severity,
                findings: vec![Finding {
                    rule_id: Some("stub-rule".to_string()),
                    severity: *severity,
                    title: format!("{} finding", severity),
                    file: Some("SKILL.md".to_string()),
                    line: Some(1),
                    snippet: None,
                }],
            },
            None => ScanResult::clean(),
        })
    }
}

/// Isolated state, skills, and source directories.
pub struct TestEnv {
    pub temp: TempDir,
    pub ctx: AppContext,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ctx = Self::context_in(temp.path());
        Self { temp, ctx }
    }

    /// A fresh context over the same directories, as a new process would build.
    pub fn reopen(&self) -> AppContext {
        Self::context_in(self.temp.path())
    }

    fn context_in(root: &Path) -> AppContext {
        let mut config = QuiverConfig::default();
        config.paths.state_dir = Some(root.join("state"));
        config.paths.skills_dir = Some(root.join("skills"));
        AppContext::from_config(config, root.to_path_buf()).expect("Failed to build context")
    }

    pub fn source_dir(&self, name: &str) -> PathBuf {
        let dir = self.temp.path().join("sources").join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create source dir");
        dir
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.temp.path().join("skills")
    }
}

pub fn write_skill(dir: &Path, name: &str, description: &str) {
    std::fs::create_dir_all(dir).expect("Failed to create skill dir");
    std::fs::write(
        dir.join("SKILL.md"),
        format!(
            "---\nname: {}\ndescription: {}\n---\n\n# {}\n\nUse this skill carefully.\n",
            name, description, name
        ),
    )
    .expect("Failed to write SKILL.md");
}

pub fn input(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Sorted entry names of a directory, empty when it does not exist.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
