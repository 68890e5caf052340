//! Keyword search over installed skills.
//!
//! Each keyword scores a record by its strongest match: exact name (100),
//! name prefix (90), name substring (80), description (50), keyword list
//! (40), tags (30), category (20). A record must match every keyword.
//! Matching two or more keywords adds 20, and usage adds up to 15.
//!
//! Results order by name tier first (exact, prefix, substring, other), so
//! usage can never lift a partial name match above an exact one.

use std::cmp::Ordering;

use serde::Serialize;

use super::record::SkillRecord;

const EXACT_NAME: u32 = 100;
const NAME_PREFIX: u32 = 90;
const NAME_SUBSTRING: u32 = 80;
const DESCRIPTION: u32 = 50;
const KEYWORD_LIST: u32 = 40;
const TAG: u32 = 30;
const CATEGORY: u32 = 20;
const MULTI_KEYWORD_BONUS: u32 = 20;
const USAGE_STEP: u32 = 3;
const USAGE_CAP: u32 = 15;

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: u32,
    /// Strongest name match over all keywords
    pub name_match: NameMatch,
    /// Which signal each keyword matched
    pub reasons: Vec<String>,
    pub record: SkillRecord,
}

/// How closely a record's name matched, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatch {
    None,
    Substring,
    Prefix,
    Exact,
}

/// Rank installed `records` against `keywords`, best first.
///
/// Name tier sorts first, then score. Ties break on most recent use, then name.
pub fn search(records: &[SkillRecord], keywords: &[String], limit: Option<usize>) -> Vec<SearchHit> {
    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = records
        .iter()
        .filter(|r| r.installed)
        .filter_map(|r| score(r, &keywords))
        .collect();

    hits.sort_by(|a, b| {
        b.name_match
            .cmp(&a.name_match)
            .then_with(|| b.score.cmp(&a.score))
            .then_with(|| match (a.record.last_used, b.record.last_used) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.record.name.cmp(&b.record.name))
    });
    if let Some(limit) = limit {
        hits.truncate(limit);
    }
    hits
}

fn score(record: &SkillRecord, keywords: &[String]) -> Option<SearchHit> {
    let name = record.name.to_lowercase();
    let description = record.description.to_lowercase();
    let category = record.category.as_deref().unwrap_or_default().to_lowercase();

    let mut total = 0;
    let mut name_match = NameMatch::None;
    let mut reasons = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let (points, reason) = if name == *keyword {
            name_match = name_match.max(NameMatch::Exact);
            (EXACT_NAME, "exact name")
        } else if keyword.chars().count() >= 2 && name.starts_with(keyword.as_str()) {
            name_match = name_match.max(NameMatch::Prefix);
            (NAME_PREFIX, "name prefix")
        } else if name.contains(keyword.as_str()) {
            name_match = name_match.max(NameMatch::Substring);
            (NAME_SUBSTRING, "name")
        } else if description.contains(keyword.as_str()) {
            (DESCRIPTION, "description")
        } else if contains_any(&record.keywords, keyword) {
            (KEYWORD_LIST, "keywords")
        } else if contains_any(&record.tags, keyword) {
            (TAG, "tags")
        } else if category.contains(keyword.as_str()) {
            (CATEGORY, "category")
        } else {
            return None;
        };
        total += points;
        reasons.push(format!("{}: {}", keyword, reason));
    }

    if keywords.len() >= 2 {
        total += MULTI_KEYWORD_BONUS;
    }
    let usage = u32::try_from(record.usage_count).unwrap_or(u32::MAX);
    total += usage.saturating_mul(USAGE_STEP).min(USAGE_CAP);

    Some(SearchHit {
        score: total,
        name_match,
        reasons,
        record: record.clone(),
    })
}

fn contains_any(values: &[String], keyword: &str) -> bool {
    values.iter().any(|v| v.to_lowercase().contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::SkillFormat;
    use crate::skills::PackageType;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;

    fn record(name: &str, description: &str) -> SkillRecord {
        SkillRecord {
            id: name.to_string(),
            name: name.to_string(),
            folder_name: name.to_string(),
            description: description.to_string(),
            category: None,
            tags: Vec::new(),
            keywords: Vec::new(),
            package_type: PackageType::Standalone,
            parent_ref: None,
            installed: true,
            installed_path: PathBuf::from("/skills").join(name),
            usage_count: 0,
            last_used: None,
            source: "test".to_string(),
            format: SkillFormat::Official,
            content_hash: String::new(),
            last_scan: None,
        }
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn names(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.record.name.as_str()).collect()
    }

    #[test]
    fn signals_rank_in_order() {
        let mut by_keyword = record("alpha", "nothing");
        by_keyword.keywords = vec!["PDF".to_string()];
        let mut by_tag = record("beta", "nothing");
        by_tag.tags = vec!["pdf-tools".to_string()];
        let records = vec![
            by_tag,
            by_keyword,
            record("gamma", "Handles PDF files"),
            record("my-pdf", "x"),
            record("pdf-extract", "x"),
            record("pdf", "x"),
        ];

        let hits = search(&records, &kw(&["pdf"]), None);
        assert_eq!(
            names(&hits),
            vec!["pdf", "pdf-extract", "my-pdf", "gamma", "alpha", "beta"]
        );
        let scores: Vec<u32> = hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![100, 90, 80, 50, 40, 30]);
    }

    #[test]
    fn single_char_prefix_counts_as_substring() {
        let hits = search(&[record("xray", "x")], &kw(&["x"]), None);
        assert_eq!(hits[0].score, NAME_SUBSTRING);
    }

    #[test]
    fn every_keyword_must_match() {
        let records = vec![
            record("pdf-extract", "Pull text out of documents"),
            record("pdf-merge", "Combine files"),
        ];
        let hits = search(&records, &kw(&["pdf", "text"]), None);
        assert_eq!(names(&hits), vec!["pdf-extract"]);
        assert_eq!(hits[0].score, 90 + 50 + MULTI_KEYWORD_BONUS);
    }

    #[test]
    fn usage_bonus_is_capped_and_monotonic() {
        let mut previous = 0;
        for uses in 0..10 {
            let mut r = record("pdf", "x");
            r.usage_count = uses;
            let score = search(&[r], &kw(&["pdf"]), None)[0].score;
            assert!(score >= previous);
            previous = score;
        }
        assert_eq!(previous, EXACT_NAME + USAGE_CAP);
    }

    #[test]
    fn exact_name_outranks_heavily_used_partial_matches() {
        let mut prefix = record("pdf-tools", "x");
        prefix.usage_count = 4;
        let mut substring = record("xpdf", "x");
        substring.usage_count = 10;
        let records = vec![prefix, substring, record("pdf", "x")];

        let hits = search(&records, &kw(&["pdf"]), None);
        assert_eq!(names(&hits), vec!["pdf", "pdf-tools", "xpdf"]);
        assert!(hits[1].score > hits[0].score);
        assert_eq!(hits[0].name_match, NameMatch::Exact);
    }

    #[test]
    fn category_is_the_weakest_signal() {
        let mut by_category = record("alpha", "nothing");
        by_category.category = Some("Documents".to_string());
        let mut by_tag = record("beta", "nothing");
        by_tag.tags = vec!["documents".to_string()];

        let hits = search(&[by_category, by_tag], &kw(&["document"]), None);
        assert_eq!(names(&hits), vec!["beta", "alpha"]);
        assert_eq!(hits[1].score, CATEGORY);
        assert_eq!(hits[1].reasons, vec!["document: category".to_string()]);
    }

    #[test]
    fn ties_prefer_recent_use_then_name() {
        let now = Utc::now();
        let mut older = record("b-notes", "notes");
        older.last_used = Some(now - Duration::hours(2));
        let mut newer = record("c-notes", "notes");
        newer.last_used = Some(now);
        let never = record("a-notes", "notes");

        let hits = search(&[never, older, newer], &kw(&["notes"]), None);
        assert_eq!(names(&hits), vec!["c-notes", "b-notes", "a-notes"]);
    }

    #[test]
    fn uninstalled_records_and_blank_queries_yield_nothing() {
        let mut gone = record("pdf", "x");
        gone.installed = false;
        assert!(search(&[gone.clone()], &kw(&["pdf"]), None).is_empty());
        assert!(search(&[record("pdf", "x")], &kw(&["  "]), None).is_empty());
    }

    #[test]
    fn limit_truncates() {
        let records = vec![record("pdf-a", "x"), record("pdf-b", "x"), record("pdf-c", "x")];
        assert_eq!(search(&records, &kw(&["pdf"]), Some(2)).len(), 2);
    }
}
