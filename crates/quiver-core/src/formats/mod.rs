//! Skill package formats and detection.
//!
//! Third-party repositories lay skills out in several ways. Each layout is a
//! [`SkillFormat`] variant; [`FormatDetector`] walks a tree and reports every
//! directory that carries a recognised marker as a [`SkillCandidate`].

mod detector;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use detector::FormatDetector;
pub(crate) use detector::{markdown_files, pick_primary_markdown, rule_files};

/// Detected layout of a skill directory, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkillFormat {
    /// `SKILL.md` with YAML frontmatter
    Official,
    /// Claude plugin: `.claude-plugin/plugin.json` or `plugin.json`
    Plugin,
    /// `AGENTS.md` or an `agents/` directory of markdown prompts
    AgentBundle,
    /// Cursor-style rules: `.cursorrules`, `.cursor/rules/`, `rules/`
    Rules,
    /// Markdown without recognised structure
    Generic,
}

impl SkillFormat {
    pub const ALL: [SkillFormat; 5] = [
        Self::Official,
        Self::Plugin,
        Self::AgentBundle,
        Self::Rules,
        Self::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Plugin => "plugin",
            Self::AgentBundle => "agent-bundle",
            Self::Rules => "rules",
            Self::Generic => "generic",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Official => "Native skill: SKILL.md with name/description frontmatter",
            Self::Plugin => "Claude plugin manifest; SKILL.md generated from plugin.json",
            Self::AgentBundle => "Agent prompts merged into a single SKILL.md",
            Self::Rules => "Editor rule files merged into the SKILL.md body",
            Self::Generic => "Markdown documentation wrapped with generated frontmatter",
        }
    }

    /// Files or directories whose presence selects this format.
    pub fn markers(self) -> &'static [&'static str] {
        match self {
            Self::Official => &["SKILL.md (with --- frontmatter)"],
            Self::Plugin => &[".claude-plugin/plugin.json", "plugin.json"],
            Self::AgentBundle => &["AGENTS.md", "agents/*.md"],
            Self::Rules => &[".cursorrules", ".cursor/rules/", "rules/*.md", "rules/*.mdc"],
            Self::Generic => &["SKILL.md (no frontmatter)", "*.md at the source root"],
        }
    }
}

impl std::fmt::Display for SkillFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for SkillFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown skill format: {}", s))
    }
}

/// A directory that looks like a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCandidate {
    /// Absolute directory of the candidate
    pub dir: PathBuf,
    /// Path relative to the detection root, `.` for the root itself
    pub relative_path: String,
    pub format: SkillFormat,
    /// Marker files found, relative to `dir`
    pub markers: Vec<String>,
    /// Content of the primary manifest file, when it is text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_manifest: Option<String>,
}

impl SkillCandidate {
    /// Directory name of the candidate.
    ///
    /// A root candidate takes `root_name` instead, since cache directories
    /// (`checkout`, `content`) say nothing about the skill.
    pub fn folder_name(&self, root_name: &str) -> String {
        if self.relative_path == "." {
            return root_name.to_string();
        }
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_name.to_string())
    }

    /// Depth below the detection root (root = 0).
    pub fn depth(&self) -> usize {
        if self.relative_path == "." {
            0
        } else {
            self.relative_path.split('/').count()
        }
    }

    /// Whether `other` lives strictly inside this candidate's directory.
    pub fn contains(&self, other: &SkillCandidate) -> bool {
        if self.relative_path == "." {
            return other.relative_path != ".";
        }
        other
            .relative_path
            .strip_prefix(&self.relative_path)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}
