//! Conversion of detected candidates into canonical skill directories.
//!
//! Planning reads manifests and decides names and metadata without touching
//! the filesystem; materializing writes `<staging>/<name>/SKILL.md` plus the
//! resources each format carries.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::formats::{SkillCandidate, SkillFormat};
use crate::fs::{CopyFilter, copy_tree, copy_tree_excluding};

use super::manifest::{PluginManifest, SkillManifest, parse_skill_md, split_frontmatter};
use super::name::{clean_description, normalize_name, synthesize_description};

/// Resource directories carried over from agent bundles.
const AGENT_RESOURCE_DIRS: [&str; 4] = ["scripts", "references", "examples", "templates"];
/// Frontmatter keys quiver writes itself.
const MANAGED_KEYS: [&str; 7] = [
    "name",
    "description",
    "version",
    "category",
    "tags",
    "keywords",
    "parent",
];

/// Position of a skill within a multi-skill package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    #[default]
    Standalone,
    Parent,
    Child,
}

impl std::fmt::Display for PackageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Standalone => "standalone",
            Self::Parent => "parent",
            Self::Child => "child",
        })
    }
}

/// A candidate after normalization, ready to stage and install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedSkill {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub format: SkillFormat,
    #[serde(default)]
    pub package_type: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<String>,
    /// Parent named by the manifest, normalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_parent: Option<String>,
    /// Name as written in the manifest (or the folder name)
    pub original_name: String,
    pub folder_name: String,
    pub relative_path: String,
    pub source_dir: PathBuf,
    /// Staged canonical directory, set by [`Normalizer::materialize`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_dir: Option<PathBuf>,
    /// Directories of candidates nested inside this one; never copied with it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(skip)]
    body: String,
    #[serde(skip)]
    extra_frontmatter: serde_yaml::Mapping,
}

impl NormalizedSkill {
    /// Whether `filter` names this skill by normalized, original, or folder name.
    pub fn matches_name(&self, filter: &str) -> bool {
        let wanted = normalize_name(filter);
        [&self.name, &self.original_name, &self.folder_name]
            .iter()
            .any(|n| normalize_name(n) == wanted)
    }
}

/// A candidate that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub reason: String,
}

struct Draft {
    manifest: SkillManifest,
    body: String,
}

/// Turns [`SkillCandidate`]s into [`NormalizedSkill`]s.
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Plan every candidate, reject duplicates, and link parents to children.
    ///
    /// `root_name` names a candidate found at the source root.
    pub fn plan_all(
        &self,
        candidates: &[SkillCandidate],
        root_name: &str,
    ) -> (Vec<NormalizedSkill>, Vec<RejectedCandidate>) {
        let mut planned: Vec<NormalizedSkill> = Vec::new();
        let mut rejected = Vec::new();

        for candidate in candidates {
            match self.plan(candidate, root_name) {
                Ok(skill) => {
                    if planned.iter().any(|s| s.name == skill.name) {
                        let err = PipelineError::validation(
                            &candidate.relative_path,
                            format!("duplicate skill name '{}' in this source", skill.name),
                        );
                        tracing::warn!(error = %err, "Rejected candidate");
                        rejected.push(RejectedCandidate {
                            relative_path: candidate.relative_path.clone(),
                            name: Some(skill.name),
                            reason: err.to_string(),
                        });
                    } else {
                        planned.push(skill);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Rejected candidate");
                    rejected.push(RejectedCandidate {
                        relative_path: candidate.relative_path.clone(),
                        name: None,
                        reason: err.to_string(),
                    });
                }
            }
        }

        link_packages(&mut planned);
        (planned, rejected)
    }

    /// Read a candidate's manifests and derive its canonical metadata.
    pub fn plan(&self, candidate: &SkillCandidate, root_name: &str) -> Result<NormalizedSkill> {
        let folder_name = candidate.folder_name(root_name);
        let draft = match candidate.format {
            SkillFormat::Official => plan_official(candidate),
            SkillFormat::Plugin => plan_plugin(candidate, &folder_name),
            SkillFormat::AgentBundle => plan_agent_bundle(candidate, &folder_name),
            SkillFormat::Rules => plan_rules(candidate, &folder_name),
            SkillFormat::Generic => plan_generic(candidate),
        }
        .map_err(|e| PipelineError::validation(&candidate.relative_path, format!("{:#}", e)))?;

        Ok(finish(candidate, folder_name, draft))
    }

    /// Write the canonical layout for `skill` into `<staging_root>/<name>`.
    pub fn materialize(&self, skill: &mut NormalizedSkill, staging_root: &Path) -> Result<PathBuf> {
        let target = staging_root.join(&skill.name);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::create_dir_all(&target)?;

        let source = skill.source_dir.clone();
        match skill.format {
            SkillFormat::Official => {
                copy_tree_excluding(&source, &target, CopyFilter::SkipGit, &skill.nested_dirs)?;
            }
            SkillFormat::Plugin => {
                for dir in visible_subdirs(&source)? {
                    if skill.nested_dirs.contains(&dir) {
                        continue;
                    }
                    if let Some(name) = dir.file_name() {
                        copy_tree_excluding(
                            &dir,
                            &target.join(name),
                            CopyFilter::SkipGit,
                            &skill.nested_dirs,
                        )?;
                    }
                }
            }
            SkillFormat::AgentBundle => {
                for name in AGENT_RESOURCE_DIRS {
                    let dir = source.join(name);
                    if dir.is_dir() {
                        copy_tree(&dir, &target.join(name), CopyFilter::SkipGit)?;
                    }
                }
            }
            SkillFormat::Rules => {}
            SkillFormat::Generic => {
                copy_tree_excluding(
                    &source,
                    &target,
                    CopyFilter::SkipHidden,
                    &skill.nested_dirs,
                )?;
            }
        }

        let skill_md = render_skill_md(skill)?;
        std::fs::write(target.join("SKILL.md"), skill_md)
            .with_context(|| format!("Failed to write SKILL.md in {}", target.display()))?;

        tracing::debug!(skill = %skill.name, path = %target.display(), "Materialized skill");
        skill.content_dir = Some(target.clone());
        Ok(target)
    }
}

/// Assign parent/child roles within one batch.
///
/// A candidate nested inside another becomes a child of its nearest
/// enclosing candidate. A manifest `parent:` naming another skill in the
/// batch also makes a child. A declared parent missing from the batch
/// leaves the skill standalone with a warning.
pub fn link_packages(skills: &mut [NormalizedSkill]) {
    let n = skills.len();
    let mut parent_of: Vec<Option<usize>> = vec![None; n];

    for i in 0..n {
        parent_of[i] = (0..n)
            .filter(|&j| j != i && path_contains(&skills[j].relative_path, &skills[i].relative_path))
            .max_by_key(|&j| path_depth(&skills[j].relative_path));
    }

    for i in 0..n {
        if parent_of[i].is_some() {
            continue;
        }
        let Some(declared) = skills[i].declared_parent.clone() else {
            continue;
        };
        match (0..n).find(|&j| j != i && skills[j].name == declared) {
            Some(j) if parent_of[j] != Some(i) => parent_of[i] = Some(j),
            Some(_) => skills[i].warnings.push(format!(
                "declared parent '{}' is its own child; installing as standalone",
                declared
            )),
            None => {
                tracing::warn!(skill = %skills[i].name, parent = %declared, "Declared parent not in source");
                skills[i].warnings.push(format!(
                    "declared parent '{}' is not part of this source; installing as standalone",
                    declared
                ));
            }
        }
    }

    for i in 0..n {
        let nested: Vec<PathBuf> = (0..n)
            .filter(|&j| j != i && path_contains(&skills[i].relative_path, &skills[j].relative_path))
            .map(|j| skills[j].source_dir.clone())
            .collect();
        skills[i].nested_dirs = nested;
    }

    for (i, parent) in parent_of.iter().enumerate() {
        if let Some(j) = *parent {
            let parent_name = skills[j].name.clone();
            skills[i].package_type = PackageType::Child;
            skills[i].parent_ref = Some(parent_name);
        }
    }
    for (j, skill) in skills.iter_mut().enumerate() {
        let has_children = parent_of.contains(&Some(j));
        if has_children && skill.package_type != PackageType::Child {
            skill.package_type = PackageType::Parent;
        }
    }
}

fn path_contains(outer: &str, inner: &str) -> bool {
    if outer == "." {
        return inner != ".";
    }
    inner
        .strip_prefix(outer)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn path_depth(path: &str) -> usize {
    if path == "." { 0 } else { path.split('/').count() }
}

fn finish(candidate: &SkillCandidate, folder_name: String, draft: Draft) -> NormalizedSkill {
    let Draft { manifest, body } = draft;
    let mut warnings = Vec::new();

    let original_name = manifest
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| folder_name.clone());
    let name = normalize_name(&original_name);
    if name != original_name {
        warnings.push(format!("name '{}' normalized to '{}'", original_name, name));
    }

    let description = manifest
        .description
        .as_deref()
        .map(clean_description)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            warnings.push("description synthesized from content".to_string());
            synthesize_description(&body, &folder_name)
        });

    let version = manifest.version.as_deref().and_then(|raw| {
        let trimmed = raw.trim();
        match semver::Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed)) {
            Ok(v) => Some(v.to_string()),
            Err(e) => {
                warnings.push(format!("dropped invalid version '{}': {}", raw, e));
                None
            }
        }
    });

    let declared_parent = manifest
        .parent
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_name);

    let mut extra = manifest.extra;
    for key in MANAGED_KEYS {
        extra.remove(key);
    }

    NormalizedSkill {
        name,
        description,
        category: manifest.category.filter(|c| !c.trim().is_empty()),
        tags: manifest.tags,
        keywords: manifest.keywords,
        version,
        format: candidate.format,
        package_type: PackageType::Standalone,
        parent_ref: None,
        declared_parent,
        original_name,
        folder_name,
        relative_path: candidate.relative_path.clone(),
        source_dir: candidate.dir.clone(),
        content_dir: None,
        nested_dirs: Vec::new(),
        warnings,
        body,
        extra_frontmatter: extra,
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn plan_official(candidate: &SkillCandidate) -> anyhow::Result<Draft> {
    let content = match &candidate.raw_manifest {
        Some(raw) => raw.clone(),
        None => read_text(&candidate.dir.join("SKILL.md"))?,
    };
    let (manifest, body) = parse_skill_md(&content)?;
    Ok(Draft { manifest, body })
}

fn plan_plugin(candidate: &SkillCandidate, folder_name: &str) -> anyhow::Result<Draft> {
    let manifest_path = [".claude-plugin/plugin.json", "plugin.json"]
        .iter()
        .map(|p| candidate.dir.join(p))
        .find(|p| p.is_file())
        .ok_or_else(|| anyhow::anyhow!("plugin.json not found"))?;
    let plugin = PluginManifest::parse(&read_text(&manifest_path)?)?;

    let mut extra = serde_yaml::Mapping::new();
    if let Some(author) = &plugin.author {
        extra.insert("author".into(), author.name().into());
    }
    let manifest = SkillManifest {
        name: plugin.name.clone(),
        description: plugin.description.clone(),
        version: plugin.version.clone(),
        category: plugin.category.clone(),
        keywords: plugin.keywords.clone(),
        extra,
        ..SkillManifest::default()
    };

    let existing = ["SKILL.md", "README.md"]
        .iter()
        .map(|f| candidate.dir.join(f))
        .find(|p| p.is_file());
    let body = match existing {
        Some(path) => strip_frontmatter(&read_text(&path)?).to_string(),
        None => {
            let title = title_case(plugin.name.as_deref().unwrap_or(folder_name));
            let mut body = format!("# {}\n\n", title);
            if let Some(description) = &plugin.description {
                body.push_str(description.trim());
                body.push_str("\n\n");
            }
            let components: Vec<String> = visible_subdirs(&candidate.dir)?
                .iter()
                .filter_map(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            if !components.is_empty() {
                body.push_str("## Components\n\n");
                for component in components {
                    body.push_str(&format!("- `{}/`\n", component));
                }
            }
            body
        }
    };
    Ok(Draft { manifest, body })
}

fn plan_agent_bundle(candidate: &SkillCandidate, folder_name: &str) -> anyhow::Result<Draft> {
    let mut sections = vec![format!("# {}\n", title_case(folder_name))];

    let skill_md = candidate.dir.join("SKILL.md");
    if skill_md.is_file() {
        sections.push(strip_frontmatter(&read_text(&skill_md)?).trim().to_string());
    }
    let agents_md = candidate.dir.join("AGENTS.md");
    if agents_md.is_file() {
        sections.push(read_text(&agents_md)?.trim().to_string());
    }
    for path in crate::formats::markdown_files(&candidate.dir.join("agents")) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = read_text(&path)?;
        sections.push(format!("## {}\n\n{}", stem, strip_frontmatter(&content).trim()));
    }

    Ok(Draft {
        manifest: SkillManifest::default(),
        body: join_sections(sections),
    })
}

fn plan_rules(candidate: &SkillCandidate, folder_name: &str) -> anyhow::Result<Draft> {
    let mut files = Vec::new();
    let cursorrules = candidate.dir.join(".cursorrules");
    if cursorrules.is_file() {
        files.push(cursorrules);
    }
    files.extend(crate::formats::rule_files(
        &candidate.dir.join(".cursor").join("rules"),
    ));
    files.extend(crate::formats::rule_files(&candidate.dir.join("rules")));

    let mut sections = vec![format!("# {}\n", title_case(folder_name))];
    for path in files {
        let label = path
            .strip_prefix(&candidate.dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let content = read_text(&path)?;
        sections.push(format!("## {}\n\n{}", label, strip_frontmatter(&content).trim()));
    }

    Ok(Draft {
        manifest: SkillManifest::default(),
        body: join_sections(sections),
    })
}

fn plan_generic(candidate: &SkillCandidate) -> anyhow::Result<Draft> {
    let skill_md = candidate.dir.join("SKILL.md");
    let primary = if skill_md.is_file() {
        skill_md
    } else {
        let markdown = crate::formats::markdown_files(&candidate.dir);
        crate::formats::pick_primary_markdown(&markdown)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no markdown document found"))?
    };
    let (manifest, body) = parse_skill_md(&read_text(&primary)?)?;
    Ok(Draft { manifest, body })
}

/// Render SKILL.md: managed frontmatter keys first, then preserved extras.
fn render_skill_md(skill: &NormalizedSkill) -> anyhow::Result<String> {
    use serde_yaml::{Mapping, Value};

    let list = |items: &[String]| Value::Sequence(items.iter().map(|s| s.as_str().into()).collect());

    let mut fm = Mapping::new();
    fm.insert("name".into(), skill.name.as_str().into());
    fm.insert("description".into(), skill.description.as_str().into());
    if let Some(version) = &skill.version {
        fm.insert("version".into(), version.as_str().into());
    }
    if let Some(category) = &skill.category {
        fm.insert("category".into(), category.as_str().into());
    }
    if !skill.tags.is_empty() {
        fm.insert("tags".into(), list(&skill.tags));
    }
    if !skill.keywords.is_empty() {
        fm.insert("keywords".into(), list(&skill.keywords));
    }
    if let Some(parent) = &skill.parent_ref {
        fm.insert("parent".into(), parent.as_str().into());
    }
    for (key, value) in &skill.extra_frontmatter {
        fm.insert(key.clone(), value.clone());
    }

    let yaml = serde_yaml::to_string(&fm).context("Failed to serialize frontmatter")?;
    Ok(format!("---\n{}---\n\n{}", yaml, skill.body.trim_start()))
}

fn strip_frontmatter(content: &str) -> &str {
    split_frontmatter(content)
        .map(|(_, body)| body)
        .unwrap_or(content)
}

fn join_sections(sections: Vec<String>) -> String {
    let mut body = sections
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    body.push('\n');
    body
}

fn title_case(name: &str) -> String {
    normalize_name(name)
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn visible_subdirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}
