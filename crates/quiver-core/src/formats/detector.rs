//! Marker-based format detection.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::skills::manifest::has_frontmatter;

use super::{SkillCandidate, SkillFormat};

const SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Walks a source tree and classifies skill directories.
#[derive(Debug, Clone)]
pub struct FormatDetector {
    max_depth: usize,
}

struct Classification {
    format: SkillFormat,
    markers: Vec<String>,
    manifest: Option<PathBuf>,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl FormatDetector {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Detect every candidate under `root`, sorted by relative path.
    ///
    /// When no directory carries a marker, a root with any markdown file is
    /// reported as a single generic candidate. An empty result is not an
    /// error here.
    pub fn detect(&self, root: &Path) -> anyhow::Result<Vec<SkillCandidate>> {
        if !root.is_dir() {
            anyhow::bail!("Not a directory: {}", root.display());
        }

        let mut candidates = Vec::new();
        self.walk(root, root, 0, &mut candidates)?;

        if candidates.is_empty() {
            let markdown = markdown_files(root);
            if let Some(primary) = pick_primary_markdown(&markdown) {
                candidates.push(SkillCandidate {
                    dir: root.to_path_buf(),
                    relative_path: ".".to_string(),
                    format: SkillFormat::Generic,
                    markers: markdown.iter().map(|p| file_name(p)).collect(),
                    raw_manifest: std::fs::read_to_string(primary).ok(),
                });
            }
        }

        candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tracing::debug!(root = %root.display(), count = candidates.len(), "Detected candidates");
        Ok(candidates)
    }

    fn walk(
        &self,
        root: &Path,
        dir: &Path,
        depth: usize,
        out: &mut Vec<SkillCandidate>,
    ) -> anyhow::Result<()> {
        if let Some(found) = classify(dir) {
            let relative_path = relative(root, dir);
            tracing::debug!(path = %relative_path, format = %found.format, "Found candidate");
            out.push(SkillCandidate {
                dir: dir.to_path_buf(),
                relative_path,
                format: found.format,
                markers: found.markers,
                raw_manifest: found
                    .manifest
                    .and_then(|p| std::fs::read_to_string(p).ok()),
            });
        }

        if depth >= self.max_depth {
            return Ok(());
        }

        let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                !name.starts_with('.') && !SKIPPED_DIRS.contains(&name.as_ref())
            })
            .map(|e| e.path())
            .collect();
        subdirs.sort();

        for sub in subdirs {
            self.walk(root, &sub, depth + 1, out)?;
        }
        Ok(())
    }
}

/// Test markers in priority order.
fn classify(dir: &Path) -> Option<Classification> {
    let skill_md = dir.join("SKILL.md");
    let skill_md_content = skill_md
        .is_file()
        .then(|| std::fs::read_to_string(&skill_md).unwrap_or_default());

    if let Some(content) = &skill_md_content {
        if has_frontmatter(content) {
            return Some(Classification {
                format: SkillFormat::Official,
                markers: vec!["SKILL.md".to_string()],
                manifest: Some(skill_md),
            });
        }
    }

    let plugin_markers: Vec<&str> = [".claude-plugin/plugin.json", "plugin.json"]
        .into_iter()
        .filter(|m| dir.join(m).is_file())
        .collect();
    if let Some(first) = plugin_markers.first() {
        return Some(Classification {
            format: SkillFormat::Plugin,
            manifest: Some(dir.join(first)),
            markers: plugin_markers.iter().map(|m| m.to_string()).collect(),
        });
    }

    let mut agent_markers = Vec::new();
    if dir.join("AGENTS.md").is_file() {
        agent_markers.push("AGENTS.md".to_string());
    }
    if !markdown_files(&dir.join("agents")).is_empty() {
        agent_markers.push("agents/".to_string());
    }
    if !agent_markers.is_empty() {
        let manifest = dir.join("AGENTS.md");
        return Some(Classification {
            format: SkillFormat::AgentBundle,
            markers: agent_markers,
            manifest: manifest.is_file().then_some(manifest),
        });
    }

    let mut rule_markers = Vec::new();
    if dir.join(".cursorrules").is_file() {
        rule_markers.push(".cursorrules".to_string());
    }
    if has_rule_files(&dir.join(".cursor").join("rules")) {
        rule_markers.push(".cursor/rules/".to_string());
    }
    if has_rule_files(&dir.join("rules")) {
        rule_markers.push("rules/".to_string());
    }
    if !rule_markers.is_empty() {
        let manifest = dir.join(".cursorrules");
        return Some(Classification {
            format: SkillFormat::Rules,
            markers: rule_markers,
            manifest: manifest.is_file().then_some(manifest),
        });
    }

    skill_md_content.map(|_| Classification {
        format: SkillFormat::Generic,
        markers: vec!["SKILL.md".to_string()],
        manifest: Some(skill_md),
    })
}

/// Markdown files directly inside `dir`, sorted.
pub(crate) fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    with_extensions(dir, &["md"])
}

/// Rule files (`.md`, `.mdc`) directly inside `dir`, sorted.
pub(crate) fn rule_files(dir: &Path) -> Vec<PathBuf> {
    with_extensions(dir, &["md", "mdc"])
}

fn has_rule_files(dir: &Path) -> bool {
    !rule_files(dir).is_empty()
}

fn with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|x| ext.eq_ignore_ascii_case(x)))
        })
        .collect();
    files.sort();
    files
}

/// README.md first, then the first markdown file by name.
pub(crate) fn pick_primary_markdown(files: &[PathBuf]) -> Option<&PathBuf> {
    files
        .iter()
        .find(|p| file_name(p).eq_ignore_ascii_case("README.md"))
        .or_else(|| files.first())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn relative(root: &Path, dir: &Path) -> String {
    match dir.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => dir.to_string_lossy().into_owned(),
    }
}
