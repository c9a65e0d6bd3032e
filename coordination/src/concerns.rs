//! Concerns extraction: turns review texts into a concerns matrix.
//!
//! ## Candidate extraction
//!
//! Reviewers are asked for a point-by-point section. Each numbered or
//! bulleted item is one candidate concern; wrapped lines are folded into
//! the item above them. When a review has headings that name a concerns
//! section ("Concerns", "Major issues", "Point-by-point analysis", ...),
//! only items under those headings count. Without such a heading every
//! list item in the review counts.
//!
//! Category is free text: an inline label (`**Statistics**: ...`), else the
//! enclosing heading, else `general`.
//!
//! ## Coalescing
//!
//! Candidates are grouped by complete linkage: a candidate joins a group
//! only when the Jaccard overlap of its description tokens reaches the
//! threshold against every member, and a group never holds two candidates
//! from the same reviewer. Each group becomes one `Concern`, so a reviewer
//! is only credited with concerns it actually wrote. Candidates are put into
//! a canonical order (reviewer slot, then position in the review) before
//! anything else, so the result does not depend on the order reviews are
//! supplied in.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::ReviewResult;
use crate::error::ConfigurationError;
use crate::registry::{Reviewer, ReviewerId};

/// Default token-overlap ratio for merging two candidates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// Default cap on a concern description.
pub const DEFAULT_MAX_DESCRIPTION_CHARS: usize = 200;

/// Category used when neither a label nor a specific heading is present.
pub const GENERAL_CATEGORY: &str = "general";

/// Words that mark a heading as the start of a concerns section.
const SECTION_KEYWORDS: [&str; 11] = [
    "concern",
    "issue",
    "weakness",
    "limitation",
    "problem",
    "critique",
    "criticism",
    "point-by-point",
    "point by point",
    "flaw",
    "comment",
];

/// Words that end a concerns section when they appear in a heading.
const EXIT_KEYWORDS: [&str; 8] = [
    "summary",
    "conclusion",
    "recommendation",
    "strength",
    "overall",
    "verdict",
    "decision",
    "assessment",
];

/// Heading words that carry no category information.
const GENERIC_HEADING_WORDS: [&str; 24] = [
    "concern",
    "concerns",
    "issue",
    "issues",
    "point",
    "by",
    "point-by-point",
    "analysis",
    "detailed",
    "specific",
    "key",
    "main",
    "the",
    "of",
    "and",
    "list",
    "flaws",
    "problems",
    "weaknesses",
    "comments",
    "critique",
    "limitations",
    "study",
    "identified",
];

const STOP_WORDS: [&str; 47] = [
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "not", "has", "have",
    "been", "from", "into", "its", "their", "there", "which", "what", "also", "more", "less",
    "very", "should", "would", "could", "may", "might", "can", "does", "did", "than", "then",
    "these", "those", "such", "about", "how", "why", "any", "all", "author", "paper", "study",
    "lack", "unclear",
];

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(#{1,6})\s+(.+?)\s*#*\s*$").expect("heading pattern compiles"));

static BOLD_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\*\*|__)(.+?)(?:\*\*|__)\s*:?\s*$").expect("bold heading pattern compiles")
});

static COLON_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][^:.!?]{0,60}):\s*$").expect("colon heading pattern compiles")
});

static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:\*\*)?(?:\d{1,3}[.)]|[-*•+])\s+(.+)$").expect("list item pattern compiles")
});

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9 /&()\-]{0,48}?)\s*[:：]\s*(.*)$").expect("label pattern compiles")
});

/// Tuning knobs for extraction and coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcernsConfig {
    /// Minimum Jaccard overlap, in (0, 1], for two candidates to merge.
    pub similarity_threshold: f64,
    /// Descriptions are cut to this many characters.
    pub max_description_chars: usize,
}

impl Default for ConcernsConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_description_chars: DEFAULT_MAX_DESCRIPTION_CHARS,
        }
    }
}

impl ConcernsConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let t = self.similarity_threshold;
        if t.is_nan() || t <= 0.0 || t > 1.0 {
            return Err(ConfigurationError::InvalidThreshold(t.to_string()));
        }
        Ok(())
    }
}

/// One distinct concern and the reviewers that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub description: String,
    pub category: String,
    /// Ordered by reviewer slot.
    pub raised_by: Vec<ReviewerId>,
}

impl Concern {
    pub fn is_raised_by(&self, reviewer: &ReviewerId) -> bool {
        self.raised_by.contains(reviewer)
    }
}

/// A concern as written in a single review, before coalescing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateConcern {
    pub description: String,
    pub category: String,
}

/// Extracts and coalesces concerns across reviews.
#[derive(Debug, Clone, Default)]
pub struct ConcernsExtractor {
    config: ConcernsConfig,
}

struct Candidate<'a> {
    reviewer: &'a Reviewer,
    position: usize,
    concern: CandidateConcern,
    tokens: BTreeSet<String>,
}

impl ConcernsExtractor {
    pub fn new(config: ConcernsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConcernsConfig {
        &self.config
    }

    /// Build the concerns list from every successful review.
    ///
    /// Failed reviews contribute no candidates, so they never appear in any
    /// `raised_by` set.
    pub fn extract(&self, results: &[ReviewResult]) -> Vec<Concern> {
        let mut candidates: Vec<Candidate<'_>> = Vec::new();
        for result in results {
            let Some(text) = result.text() else {
                continue;
            };
            let found = extract_candidates(text, self.config.max_description_chars);
            debug!(reviewer = %result.reviewer.id, candidates = found.len(), "extracted candidate concerns");
            for (position, concern) in found.into_iter().enumerate() {
                let tokens = tokenize(&concern.description);
                candidates.push(Candidate {
                    reviewer: &result.reviewer,
                    position,
                    concern,
                    tokens,
                });
            }
        }

        // Canonical order: independent of the order of `results`.
        candidates.sort_by_key(|c| (c.reviewer.slot_index, c.position));

        let groups = group_candidates(&candidates, self.config.similarity_threshold);

        let concerns: Vec<Concern> = groups
            .iter()
            .map(|members| {
                let representative = &candidates[members[0]].concern;
                let category = members
                    .iter()
                    .map(|&m| candidates[m].concern.category.as_str())
                    .find(|c| *c != GENERAL_CATEGORY)
                    .unwrap_or(GENERAL_CATEGORY)
                    .to_string();

                // Members are in canonical order and hold one candidate per
                // reviewer, so this is already slot-ordered and unique.
                let raised_by = members.iter().map(|&m| candidates[m].reviewer.id.clone()).collect();

                Concern {
                    description: representative.description.clone(),
                    category,
                    raised_by,
                }
            })
            .collect();

        debug!(
            candidates = candidates.len(),
            concerns = concerns.len(),
            "coalesced concerns"
        );
        concerns
    }
}

// ── Candidate extraction ─────────────────────────────────────────────────────

#[derive(Debug)]
struct RawItem {
    text: String,
    heading: Option<String>,
    in_section: bool,
}

#[derive(Debug, Default)]
struct SectionState {
    heading: Option<String>,
    /// Markdown level of the heading that opened the current concerns
    /// section; 7 for bold or colon headings.
    section_level: Option<usize>,
}

impl SectionState {
    fn enter(&mut self, text: &str, level: usize) {
        let lowered = text.to_lowercase();
        let is_concern = SECTION_KEYWORDS.iter().any(|k| lowered.contains(k));
        let is_exit = EXIT_KEYWORDS.iter().any(|k| lowered.contains(k));

        if is_concern {
            if self.section_level.map_or(true, |l| level <= l) {
                self.section_level = Some(level);
            }
        } else if let Some(section_level) = self.section_level {
            if is_exit || level <= section_level {
                self.section_level = None;
            }
        }
        self.heading = Some(text.trim().to_string());
    }

    fn in_section(&self) -> bool {
        self.section_level.is_some()
    }
}

/// Split one review into candidate concerns.
pub fn extract_candidates(text: &str, max_description_chars: usize) -> Vec<CandidateConcern> {
    let mut state = SectionState::default();
    let mut items: Vec<RawItem> = Vec::new();
    let mut current: Option<RawItem> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            items.extend(current.take());
            continue;
        }

        if let Some((heading, level)) = parse_heading(line) {
            items.extend(current.take());
            state.enter(&heading, level);
            continue;
        }

        if let Some(caps) = LIST_ITEM_RE.captures(line) {
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            let body = caps.get(2).map_or("", |m| m.as_str()).trim();
            if indent >= 2 {
                if let Some(item) = current.as_mut() {
                    item.text.push(' ');
                    item.text.push_str(body);
                    continue;
                }
            }
            items.extend(current.take());
            current = Some(RawItem {
                text: body.to_string(),
                heading: state.heading.clone(),
                in_section: state.in_section(),
            });
            continue;
        }

        if let Some(item) = current.as_mut() {
            item.text.push(' ');
            item.text.push_str(line.trim());
        }
    }
    items.extend(current.take());

    let any_in_section = items.iter().any(|i| i.in_section);
    items
        .into_iter()
        .filter(|i| !any_in_section || i.in_section)
        .filter_map(|i| to_candidate(&i, max_description_chars))
        .collect()
}

fn parse_heading(line: &str) -> Option<(String, usize)> {
    if let Some(caps) = HEADING_RE.captures(line) {
        let level = caps.get(1).map_or(1, |m| m.as_str().len());
        let text = strip_emphasis(caps.get(2).map_or("", |m| m.as_str()));
        return Some((text.trim_end_matches(':').trim().to_string(), level));
    }
    if let Some(caps) = BOLD_HEADING_RE.captures(line) {
        let text = strip_emphasis(caps.get(1).map_or("", |m| m.as_str()));
        return Some((text.trim_end_matches(':').trim().to_string(), 7));
    }
    if LIST_ITEM_RE.is_match(line) {
        return None;
    }
    let caps = COLON_HEADING_RE.captures(line)?;
    let text = caps.get(1).map_or("", |m| m.as_str()).trim();
    if text.split_whitespace().count() > 8 {
        return None;
    }
    Some((strip_emphasis(text), 7))
}

fn to_candidate(item: &RawItem, max_chars: usize) -> Option<CandidateConcern> {
    let text = collapse_whitespace(&strip_emphasis(&item.text));
    if text.is_empty() {
        return None;
    }

    let (label, body) = match LABEL_RE.captures(&text) {
        Some(caps) => {
            let label = caps.get(1).map_or("", |m| m.as_str()).trim();
            let body = caps.get(2).map_or("", |m| m.as_str()).trim();
            if label.split_whitespace().count() <= 5 {
                (Some(label.to_string()), body.to_string())
            } else {
                (None, text.clone())
            }
        }
        None => (None, text.clone()),
    };

    let description = match (body.is_empty(), &label) {
        (true, Some(label)) => label.clone(),
        _ => first_sentence(&body, max_chars),
    };
    if description.is_empty() {
        return None;
    }

    let category = label
        .map(|l| l.to_lowercase())
        .or_else(|| item.heading.as_deref().and_then(heading_category))
        .unwrap_or_else(|| GENERAL_CATEGORY.to_string());

    Some(CandidateConcern {
        description,
        category,
    })
}

fn heading_category(heading: &str) -> Option<String> {
    let lowered = heading.to_lowercase();
    let specific = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .any(|w| !GENERIC_HEADING_WORDS.contains(&w) && !w.chars().all(|c| c.is_ascii_digit()));
    specific.then(|| lowered.trim().to_string())
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .trim()
        .to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First sentence of `text`, capped at `max_chars` on a word boundary.
fn first_sentence(text: &str, max_chars: usize) -> String {
    let mut end = text.len();
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '?' | '!') && i >= 20 {
            let next = text[i + c.len_utf8()..].chars().next();
            if next.map_or(true, char::is_whitespace) {
                end = i;
                break;
            }
        }
    }
    let sentence = text[..end].trim();

    if sentence.chars().count() <= max_chars {
        return sentence.trim_end_matches(['.', ';', ',']).to_string();
    }
    let cut: String = sentence.chars().take(max_chars).collect();
    let cut = match cut.rfind(' ') {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    cut.trim_end_matches(['.', ';', ',']).trim().to_string()
}

// ── Similarity ───────────────────────────────────────────────────────────────

/// Lower-cased content tokens with light plural folding.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(fold_plural)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn fold_plural(token: &str) -> String {
    if let Some(stem) = token.strip_suffix("ies") {
        if stem.len() >= 2 {
            return format!("{stem}y");
        }
    }
    if token.len() > 4 && token.ends_with('s') && !token.ends_with("ss") {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}

/// Jaccard overlap of two token sets; 0 when either is empty.
pub fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Complete-linkage grouping over candidates in canonical order.
///
/// A candidate joins an existing group only when it reaches `threshold`
/// against every member and the group holds nothing yet from the same
/// reviewer. Among eligible groups the one with the strongest weakest link
/// wins, ties going to the earliest. Groups come back ordered by their first
/// member, with members ascending.
fn group_candidates(candidates: &[Candidate<'_>], threshold: f64) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, candidate) in candidates.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        for (g, members) in groups.iter().enumerate() {
            let same_reviewer = members
                .iter()
                .any(|&m| candidates[m].reviewer.slot_index == candidate.reviewer.slot_index);
            if same_reviewer {
                continue;
            }
            let weakest = members
                .iter()
                .map(|&m| similarity(&candidates[m].tokens, &candidate.tokens))
                .fold(f64::INFINITY, f64::min);
            if weakest >= threshold && best.map_or(true, |(_, score)| weakest > score) {
                best = Some((g, weakest));
            }
        }

        match best {
            Some((g, _)) => groups[g].push(i),
            None => groups.push(vec![i]),
        }
    }
    groups
}
