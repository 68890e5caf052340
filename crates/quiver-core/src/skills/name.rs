//! Naming and description rules for installed skills.

use crate::skills::manifest::split_frontmatter;

/// Longest allowed skill name.
pub const MAX_NAME_LEN: usize = 64;
/// Longest allowed description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Map any string to a hyphen-case skill name.
///
/// Total and idempotent: `normalize_name(normalize_name(s)) == normalize_name(s)`.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "skill-");
    }
    out.truncate(MAX_NAME_LEN);
    let trimmed = out.trim_end_matches('-');

    if trimmed.is_empty() {
        let digest = blake3::hash(raw.as_bytes()).to_hex();
        return format!("skill-{}", &digest.as_str()[..8]);
    }
    trimmed.to_string()
}

/// Whether `name` is already in normalized form.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty() && normalize_name(name) == name
}

/// Strip markup, collapse whitespace, and cap the length.
pub fn clean_description(raw: &str) -> String {
    let stripped = strip_tags(raw);
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_DESCRIPTION_LEN {
        return collapsed;
    }
    collapsed
        .chars()
        .take(MAX_DESCRIPTION_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Remove `<tag ...>` and `</tag>` sequences. A `<` that does not open a tag
/// (e.g. `a < b`) is kept.
fn strip_tags(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        let close = after.find('>').filter(|&end| {
            let inner = &after[..end];
            !inner.contains('<') && !inner.contains('\n')
        });
        match (opens_tag, close) {
            (true, Some(end)) => {
                out.push(' ');
                rest = &after[end + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Description for a document without one.
///
/// First non-heading paragraph line after any frontmatter, else the first
/// heading's text, else a generated sentence naming `dir_name`.
pub fn synthesize_description(document: &str, dir_name: &str) -> String {
    let body = split_frontmatter(document)
        .map(|(_, body)| body)
        .unwrap_or(document);

    let mut first_heading = None;
    let mut in_fence = false;
    for line in body.lines() {
        let line = line.trim();
        if line.starts_with("```") || line.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || line.is_empty() || line == "---" {
            continue;
        }
        if let Some(heading) = line.strip_prefix('#') {
            if first_heading.is_none() {
                let text = heading.trim_start_matches('#').trim();
                if !text.is_empty() {
                    first_heading = Some(text.to_string());
                }
            }
            continue;
        }
        let cleaned = clean_description(line);
        if !cleaned.is_empty() {
            return cleaned;
        }
    }

    match first_heading {
        Some(heading) => clean_description(&heading),
        None => format!("Skill converted from {}", dir_name),
    }
}
