//! SKILL.md frontmatter and plugin.json parsing.

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};

/// Frontmatter fields quiver understands. Anything else is kept in `extra`
/// and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub keywords: Vec<String>,
    /// Name of the parent skill this one belongs to
    #[serde(default, deserialize_with = "scalar_string")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// Subset of a Claude plugin manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub author: Option<PluginAuthor>,
}

/// Author field can be a string or an object with `name`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PluginAuthor {
    Simple(String),
    Object { name: String },
}

impl PluginAuthor {
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(s) => s,
            Self::Object { name } => name,
        }
    }
}

impl PluginManifest {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("invalid plugin.json")
    }
}

/// Whether `content` opens with a complete `---` frontmatter block.
pub fn has_frontmatter(content: &str) -> bool {
    split_frontmatter(content).is_some()
}

/// Split into `(frontmatter, body)`; `None` when there is no block.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    let after_open = trimmed.strip_prefix("---")?;
    let after_open = after_open
        .strip_prefix("\r\n")
        .or_else(|| after_open.strip_prefix('\n'))?;

    // Closing delimiter may immediately follow the opening one.
    if let Some(body) = after_open.strip_prefix("---") {
        return Some(("", body.trim_start_matches(['\r', '\n'])));
    }
    let close = after_open.find("\n---")?;
    let frontmatter = &after_open[..close];
    let rest = &after_open[close + 4..];
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    Some((frontmatter, body))
}

/// Parse the frontmatter of a SKILL.md; returns the manifest and the body.
///
/// A document without frontmatter yields an empty manifest and the whole
/// document as body.
pub fn parse_skill_md(content: &str) -> anyhow::Result<(SkillManifest, String)> {
    let Some((frontmatter, body)) = split_frontmatter(content) else {
        return Ok((SkillManifest::default(), content.to_string()));
    };
    if frontmatter.trim().is_empty() {
        return Ok((SkillManifest::default(), body.to_string()));
    }
    let manifest: SkillManifest =
        serde_yaml::from_str(frontmatter).context("invalid SKILL.md frontmatter")?;
    Ok((manifest, body.to_string()))
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }))
}

/// Accepts a YAML list or a comma-separated string.
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    let items = match value {
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .into_iter()
            .filter_map(|v| match v {
                serde_yaml::Value::String(s) => Some(s),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(serde_yaml::Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_frontmatter_and_body() {
        let (fm, body) = split_frontmatter("---\nname: pdf\n---\n# PDF\nbody\n").unwrap();
        assert_eq!(fm, "name: pdf");
        assert_eq!(body, "# PDF\nbody\n");
    }

    #[test]
    fn no_frontmatter_without_closing_delimiter() {
        assert!(!has_frontmatter("---\nname: pdf\n# never closed"));
        assert!(!has_frontmatter("# Title\n---\n"));
        assert!(has_frontmatter("\u{feff}---\nname: x\n---\n"));
    }

    #[test]
    fn parses_known_fields_and_keeps_extras() {
        let (manifest, body) = parse_skill_md(
            "---\nname: PDF Tools\ndescription: Work with PDFs\nversion: 1.2.0\ntags: pdf, documents\nlicense: MIT\n---\nBody\n",
        )
        .unwrap();
        assert_eq!(manifest.name.as_deref(), Some("PDF Tools"));
        assert_eq!(manifest.version.as_deref(), Some("1.2.0"));
        assert_eq!(manifest.tags, vec!["pdf", "documents"]);
        assert!(manifest.extra.contains_key("license"));
        assert_eq!(body, "Body\n");
    }

    #[test]
    fn numeric_version_is_stringified() {
        let (manifest, _) = parse_skill_md("---\nname: a\nversion: 2\n---\n").unwrap();
        assert_eq!(manifest.version.as_deref(), Some("2"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = parse_skill_md("---\nname: [unclosed\n---\nbody").unwrap_err();
        assert!(err.to_string().contains("frontmatter"));
    }

    #[test]
    fn plugin_author_forms() {
        let simple = PluginManifest::parse(r#"{"name":"p","author":"Ann"}"#).unwrap();
        assert_eq!(simple.author.unwrap().name(), "Ann");
        let object = PluginManifest::parse(r#"{"name":"p","author":{"name":"Bo"}}"#).unwrap();
        assert_eq!(object.author.unwrap().name(), "Bo");
        assert!(PluginManifest::parse("{not json").is_err());
    }
}
