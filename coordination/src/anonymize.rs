//! Strips model-identifying strings from reviews before synthesis.
//!
//! Matching is literal and case-insensitive. It removes the reviewer's own
//! model identifier plus the configured aliases of its model family, and in
//! the bundle pass every other model identifier of the session as well.
//! Paraphrases ("as a large model trained by a well-known lab") are not
//! caught; this lowers the odds of accidental self-identification, it does
//! not guarantee anonymity.

use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dispatch::ReviewResult;
use crate::registry::ReviewerId;

/// Default replacement for scrubbed names.
pub const DEFAULT_PLACEHOLDER: &str = "[model]";

/// Replacement passes before falling back to plain deletion.
const MAX_PLACEHOLDER_PASSES: usize = 4;

/// Aliases for one model family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasGroup {
    /// Family name, also scrubbed (e.g. "claude").
    pub family: String,
    /// A model belongs to this family if its identifier starts with one of
    /// these prefixes (case-insensitive).
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Extra strings that identify the family (e.g. "Anthropic").
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl AliasGroup {
    pub fn new(family: &str, prefixes: &[&str], aliases: &[&str]) -> Self {
        Self {
            family: family.to_string(),
            prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn matches(&self, model_identifier: &str) -> bool {
        let model = model_identifier.to_lowercase();
        model.starts_with(&self.family.to_lowercase())
            || self
                .prefixes
                .iter()
                .any(|p| !p.is_empty() && model.starts_with(&p.to_lowercase()))
    }

    fn terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.family.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Known model families. Passed in explicitly; there is no global table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    groups: Vec<AliasGroup>,
}

impl AliasTable {
    pub fn new(groups: Vec<AliasGroup>) -> Self {
        Self { groups }
    }

    /// Families of the models the command line knows about.
    pub fn builtin() -> Self {
        Self::new(vec![
            AliasGroup::new("gpt", &["gpt", "o1", "o3", "o4", "chatgpt"], &["OpenAI", "ChatGPT"]),
            AliasGroup::new("claude", &["claude"], &["Anthropic"]),
            AliasGroup::new("gemini", &["gemini"], &["Google DeepMind", "Bard"]),
            AliasGroup::new("deepseek", &["deepseek"], &[]),
            AliasGroup::new("llama", &["llama", "meta-llama"], &["Meta AI"]),
        ])
    }

    pub fn groups(&self) -> &[AliasGroup] {
        &self.groups
    }

    /// The identifier itself plus every alias of the families it belongs to.
    pub fn terms_for(&self, model_identifier: &str) -> Vec<String> {
        let mut terms = vec![model_identifier.to_string()];
        for group in self.groups.iter().filter(|g| g.matches(model_identifier)) {
            terms.extend(group.terms().map(str::to_string));
        }
        normalize_terms(terms)
    }
}

/// A successful review with identifying strings removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizedReview {
    pub reviewer_id: ReviewerId,
    pub text: String,
}

/// Literal, case-insensitive scrubber.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    aliases: AliasTable,
    placeholder: String,
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new(AliasTable::default())
    }
}

impl Anonymizer {
    pub fn new(aliases: AliasTable) -> Self {
        Self {
            aliases,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    /// Anonymize one result. Failed results yield `None`.
    pub fn anonymize(&self, result: &ReviewResult) -> Option<AnonymizedReview> {
        let text = result.text()?;
        let terms = self.aliases.terms_for(&result.reviewer.model_identifier);
        Some(AnonymizedReview {
            reviewer_id: result.reviewer.id.clone(),
            text: scrub(text, &terms, &self.placeholder),
        })
    }

    /// Anonymize the whole bundle in reviewer order.
    ///
    /// Besides its own names, each text is scrubbed of every model
    /// identifier (and family alias) present in the session.
    pub fn anonymize_all(&self, results: &[ReviewResult]) -> Vec<AnonymizedReview> {
        let mut session_terms = Vec::new();
        for result in results {
            session_terms.extend(self.aliases.terms_for(&result.reviewer.model_identifier));
        }
        let session_terms = normalize_terms(session_terms);

        let bundle: Vec<AnonymizedReview> = results
            .iter()
            .filter_map(|result| self.anonymize(result))
            .map(|mut review| {
                review.text = scrub(&review.text, &session_terms, &self.placeholder);
                review
            })
            .collect();

        debug!(
            total = results.len(),
            anonymized = bundle.len(),
            terms = session_terms.len(),
            "anonymized review bundle"
        );
        bundle
    }
}

/// Drop blanks and duplicates (case-insensitive); longest first so the
/// alternation prefers "gpt-4o-mini" over "gpt-4o".
fn normalize_terms(terms: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for term in terms {
        let term = term.trim().to_string();
        if term.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(&term)) {
            continue;
        }
        out.push(term);
    }
    out.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    out
}

/// Compiled-size ceiling for the term alternation.
const PATTERN_SIZE_LIMIT: usize = 10 * (1 << 20);

fn build_pattern(terms: &[String], size_limit: usize) -> Result<Regex, regex::Error> {
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    // Escaped literals: only the compiled-size limit can reject this.
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .size_limit(size_limit)
        .build()
}

/// Replace every case-insensitive occurrence of `terms` in `text`.
///
/// Replacing can splice a new occurrence together at a boundary, so the
/// pass repeats until the text is clean. After a few passes, or when the
/// placeholder itself contains a term, matches are deleted instead, which
/// always terminates because every pass shrinks the text.
pub fn scrub(text: &str, terms: &[String], placeholder: &str) -> String {
    scrub_with_limit(text, terms, placeholder, PATTERN_SIZE_LIMIT)
}

fn scrub_with_limit(text: &str, terms: &[String], placeholder: &str, size_limit: usize) -> String {
    if terms.is_empty() {
        return text.to_string();
    }
    match build_pattern(terms, size_limit) {
        Ok(pattern) => scrub_passes(
            text,
            placeholder,
            |t| pattern.is_match(t),
            |t, with| pattern.replace_all(t, NoExpand(with)).into_owned(),
        ),
        Err(err) => {
            warn!(
                terms = terms.len(),
                error = %err,
                "term pattern rejected, scrubbing term by term (ASCII case folding only)"
            );
            scrub_passes(
                text,
                placeholder,
                |t| contains_literal(t, terms),
                |t, with| replace_literal(t, terms, with),
            )
        }
    }
}

fn scrub_passes(
    text: &str,
    placeholder: &str,
    is_match: impl Fn(&str) -> bool,
    replace: impl Fn(&str, &str) -> String,
) -> String {
    let mut current = text.to_string();
    if !is_match(placeholder) {
        for _ in 0..MAX_PLACEHOLDER_PASSES {
            if !is_match(&current) {
                return current;
            }
            current = replace(&current, placeholder);
        }
    }
    while is_match(&current) {
        current = replace(&current, "");
    }
    current
}

fn contains_literal(text: &str, terms: &[String]) -> bool {
    let haystack = text.to_ascii_lowercase();
    terms
        .iter()
        .any(|term| haystack.contains(&term.to_ascii_lowercase()))
}

/// ASCII lower-casing keeps byte offsets, so match positions in the folded
/// copy index the original text directly.
fn replace_literal(text: &str, terms: &[String], with: &str) -> String {
    let mut current = text.to_string();
    for term in terms {
        let needle = term.to_ascii_lowercase();
        let haystack = current.to_ascii_lowercase();
        let mut out = String::with_capacity(current.len());
        let mut last = 0;
        for (start, _) in haystack.match_indices(&needle) {
            out.push_str(&current[last..start]);
            out.push_str(with);
            last = start + needle.len();
        }
        out.push_str(&current[last..]);
        current = out;
    }
    current
}
