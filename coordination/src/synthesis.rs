//! Meta-review synthesizer.
//!
//! Runs only after dispatch has finished. It sends the anonymized bundle
//! to the single designated meta-reviewer, cuts the `CONCERNS_TABLE_DATA`
//! section out of the reply and parses the table it contains.
//!
//! | Input                    | Backend calls | Outcome                  |
//! |--------------------------|---------------|--------------------------|
//! | no anonymized reviews    | 0             | `EmptyInput`             |
//! | call fails / blank reply | 1             | `Failed(BackendError)`   |
//! | otherwise                | 1             | `Completed(MetaReview)`  |

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::anonymize::AnonymizedReview;
use crate::backend::SharedBackend;
use crate::dispatch::DEFAULT_CALL_TIMEOUT;
use crate::error::{BackendError, ConfigurationError};
use crate::prompts::{
    render_metareview_prompt, require_placeholder, CONCERNS_TABLE_MARKER, REVIEWS_TEXT_PLACEHOLDER,
};
use crate::registry::ReviewerId;

/// Synthesized report over the anonymized reviews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaReview {
    /// Report text with the concerns table section removed.
    pub text: String,
    /// Reviewers whose reviews went into the bundle, in reviewer order.
    pub based_on: Vec<ReviewerId>,
    /// The meta-reviewer's own concerns table, when it produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_concerns: Option<Vec<ReportedConcern>>,
}

/// One row of the meta-reviewer's `CONCERNS_TABLE_DATA` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedConcern {
    pub concern: String,
    pub raised_by: Vec<ReviewerId>,
}

/// Why the session does or does not carry a meta-review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetaReviewStatus {
    Completed,
    /// Meta-review was switched off for the session.
    Disabled,
    /// Every reviewer failed; the meta-reviewer was not called.
    EmptyInput,
    Failed {
        reason: String,
    },
}

impl MetaReviewStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Result of one synthesis attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Completed(MetaReview),
    EmptyInput,
    Failed(BackendError),
}

impl SynthesisOutcome {
    pub fn status(&self) -> MetaReviewStatus {
        match self {
            Self::Completed(_) => MetaReviewStatus::Completed,
            Self::EmptyInput => MetaReviewStatus::EmptyInput,
            Self::Failed(e) => MetaReviewStatus::Failed {
                reason: e.to_string(),
            },
        }
    }

    pub fn into_meta_review(self) -> Option<MetaReview> {
        match self {
            Self::Completed(review) => Some(review),
            Self::EmptyInput | Self::Failed(_) => None,
        }
    }
}

/// Sends the anonymized bundle to the meta-reviewer.
pub struct MetaReviewSynthesizer {
    backend: SharedBackend,
    meta_reviewer_model: String,
    prompt_template: String,
    call_timeout: Duration,
}

impl MetaReviewSynthesizer {
    pub fn new(
        backend: SharedBackend,
        meta_reviewer_model: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            meta_reviewer_model: meta_reviewer_model.into(),
            prompt_template: prompt_template.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Fail fast on a template the meta-reviewer could never be given.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.meta_reviewer_model.trim().is_empty() {
            return Err(ConfigurationError::NoMetaReviewer);
        }
        require_placeholder(&self.prompt_template, "metareview", REVIEWS_TEXT_PLACEHOLDER)
    }

    /// Synthesize a meta-review from `reviews`.
    pub async fn synthesize(
        &self,
        reviews: &[AnonymizedReview],
    ) -> Result<SynthesisOutcome, ConfigurationError> {
        self.validate()?;

        if reviews.is_empty() {
            warn!("no successful reviews; skipping meta-review");
            return Ok(SynthesisOutcome::EmptyInput);
        }

        let prompt = render_metareview_prompt(&self.prompt_template, &bundle_text(reviews))?;
        let based_on: Vec<ReviewerId> = reviews.iter().map(|r| r.reviewer_id.clone()).collect();

        info!(
            model = %self.meta_reviewer_model,
            reviews = reviews.len(),
            "requesting meta-review"
        );
        let start = Instant::now();

        let reply = match tokio::time::timeout(
            self.call_timeout,
            self.backend.generate(&self.meta_reviewer_model, &prompt),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Ok(self.failed(e)),
            Err(_) => {
                return Ok(self.failed(BackendError::Timeout {
                    after: self.call_timeout,
                }))
            }
        };

        let (text, table) = split_concerns_table(&reply);
        if text.trim().is_empty() {
            return Ok(self.failed(BackendError::EmptyResponse));
        }
        let reported_concerns = table.and_then(|json| parse_reported_concerns(json, &based_on));

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            reported_concerns = reported_concerns.as_ref().map(Vec::len),
            "meta-review complete"
        );

        Ok(SynthesisOutcome::Completed(MetaReview {
            text: text.to_string(),
            based_on,
            reported_concerns,
        }))
    }

    fn failed(&self, error: BackendError) -> SynthesisOutcome {
        warn!(model = %self.meta_reviewer_model, error = %error, "meta-review failed");
        SynthesisOutcome::Failed(error)
    }
}

/// `Review from <code>:\n\n<text>\n\n` for each review, in order.
pub fn bundle_text(reviews: &[AnonymizedReview]) -> String {
    reviews
        .iter()
        .map(|r| format!("Review from {}:\n\n{}\n\n", r.reviewer_id, r.text))
        .collect()
}

static FENCED_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fenced block pattern compiles")
});

static BARE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{\s*"concerns"\s*:\s*\[.*\]\s*\}"#).expect("bare table pattern compiles")
});

/// Split a meta-review reply into report text and concerns-table JSON.
///
/// Everything from the `CONCERNS_TABLE_DATA` marker onward is dropped from
/// the report, along with a heading or quote that introduces it.
pub fn split_concerns_table(reply: &str) -> (&str, Option<&str>) {
    let Some(pos) = reply.find(CONCERNS_TABLE_MARKER) else {
        let table = BARE_TABLE_RE.find(reply).map(|m| m.as_str());
        return (reply.trim(), table);
    };

    let text = reply[..pos]
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '#' | '*' | '\'' | '"' | '`'))
        .trim();
    let section = &reply[pos..];
    let table = FENCED_TABLE_RE
        .captures(section)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| BARE_TABLE_RE.find(section).map(|m| m.as_str()));

    (text, table)
}

/// Parse `{"concerns": [{"concern": "...", "alfa": true, ...}]}`.
///
/// Only reviewers in `known` are kept; unparseable JSON yields `None`.
pub fn parse_reported_concerns(json: &str, known: &[ReviewerId]) -> Option<Vec<ReportedConcern>> {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "meta-review concerns table is not valid JSON");
            return None;
        }
    };

    let rows = value.get("concerns")?.as_array()?;
    let concerns = rows
        .iter()
        .filter_map(|row| {
            let concern = row.get("concern")?.as_str()?.trim().to_string();
            if concern.is_empty() {
                return None;
            }
            let raised_by = known
                .iter()
                .filter(|id| row.get(id.as_str()).and_then(|v| v.as_bool()) == Some(true))
                .cloned()
                .collect();
            Some(ReportedConcern { concern, raised_by })
        })
        .collect();

    Some(concerns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::prompts::DEFAULT_METAREVIEW_PROMPT;
    use std::sync::Arc;

    fn review(code: usize, text: &str) -> AnonymizedReview {
        AnonymizedReview {
            reviewer_id: ReviewerId::for_slot(code),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_input_never_calls_backend() {
        let mut backend = MockBackend::new();
        backend.expect_generate().never();

        let synth = MetaReviewSynthesizer::new(Arc::new(backend), "meta", DEFAULT_METAREVIEW_PROMPT);
        let outcome = synth.synthesize(&[]).await.unwrap();

        assert_eq!(outcome, SynthesisOutcome::EmptyInput);
        assert_eq!(outcome.status(), MetaReviewStatus::EmptyInput);
    }

    #[tokio::test]
    async fn test_single_call_with_bundle() {
        let mut backend = MockBackend::new();
        backend
            .expect_generate()
            .withf(|model: &str, prompt: &str| {
                model == "meta"
                    && prompt.contains("Review from alfa:\n\nfirst review")
                    && prompt.contains("Review from charlie:\n\nthird review")
                    && !prompt.contains("bravo")
            })
            .times(1)
            .returning(|_, _| Ok("Both reviewers question the sample size.".to_string()));

        let synth = MetaReviewSynthesizer::new(Arc::new(backend), "meta", "Summarize:\n{reviews_text}");
        let outcome = synth
            .synthesize(&[review(0, "first review"), review(2, "third review")])
            .await
            .unwrap();

        let meta = outcome.into_meta_review().unwrap();
        assert_eq!(meta.text, "Both reviewers question the sample size.");
        assert_eq!(
            meta.based_on,
            vec![ReviewerId::for_slot(0), ReviewerId::for_slot(2)]
        );
        assert!(meta.reported_concerns.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mut backend = MockBackend::new();
        backend.expect_generate().times(1).returning(|_, _| {
            Err(BackendError::HttpStatus {
                status: 429,
                body: "rate limited".into(),
            })
        });

        let synth = MetaReviewSynthesizer::new(Arc::new(backend), "meta", DEFAULT_METAREVIEW_PROMPT);
        let outcome = synth.synthesize(&[review(0, "text")]).await.unwrap();

        match outcome.status() {
            MetaReviewStatus::Failed { reason } => assert!(reason.contains("429")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(outcome.into_meta_review().is_none());
    }

    #[tokio::test]
    async fn test_blank_reply_is_not_an_empty_report() {
        let mut backend = MockBackend::new();
        backend
            .expect_generate()
            .times(1)
            .returning(|_, _| Ok("CONCERNS_TABLE_DATA\n```json\n{\"concerns\": []}\n```".to_string()));

        let synth = MetaReviewSynthesizer::new(Arc::new(backend), "meta", DEFAULT_METAREVIEW_PROMPT);
        let outcome = synth.synthesize(&[review(0, "text")]).await.unwrap();
        assert_eq!(outcome, SynthesisOutcome::Failed(BackendError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_invalid_template_is_configuration_error() {
        let mut backend = MockBackend::new();
        backend.expect_generate().never();

        let synth = MetaReviewSynthesizer::new(Arc::new(backend), "meta", "no placeholder");
        let err = synth.synthesize(&[review(0, "text")]).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingPlaceholder { .. }));

        let mut backend = MockBackend::new();
        backend.expect_generate().never();
        let synth = MetaReviewSynthesizer::new(Arc::new(backend), " ", DEFAULT_METAREVIEW_PROMPT);
        assert_eq!(synth.validate(), Err(ConfigurationError::NoMetaReviewer));
    }

    #[test]
    fn test_split_and_parse_concerns_table() {
        let reply = "Meta-review body.\n\n## CONCERNS_TABLE_DATA\n\n```json\n{\n  \"concerns\": [\n    {\"concern\": \"Small sample\", \"alfa\": true, \"bravo\": false, \"zulu\": true},\n    {\"concern\": \"No preregistration\", \"alfa\": false, \"bravo\": true}\n  ]\n}\n```\n";
        let (text, table) = split_concerns_table(reply);
        assert_eq!(text, "Meta-review body.");

        let known = vec![ReviewerId::for_slot(0), ReviewerId::for_slot(1)];
        let concerns = parse_reported_concerns(table.unwrap(), &known).unwrap();
        assert_eq!(concerns.len(), 2);
        assert_eq!(concerns[0].concern, "Small sample");
        assert_eq!(concerns[0].raised_by, vec![ReviewerId::for_slot(0)]);
        assert_eq!(concerns[1].raised_by, vec![ReviewerId::for_slot(1)]);
    }

    #[test]
    fn test_bare_table_without_marker() {
        let reply = "Summary text {\"concerns\": [{\"concern\": \"Bias\", \"alfa\": true}]}";
        let (text, table) = split_concerns_table(reply);
        assert_eq!(text, reply);
        let concerns = parse_reported_concerns(table.unwrap(), &[ReviewerId::for_slot(0)]).unwrap();
        assert_eq!(concerns[0].concern, "Bias");
    }

    #[test]
    fn test_unparseable_table_is_ignored() {
        let reply = "Body\nCONCERNS_TABLE_DATA\n```json\n{not json}\n```";
        let (text, table) = split_concerns_table(reply);
        assert_eq!(text, "Body");
        assert!(parse_reported_concerns(table.unwrap(), &[]).is_none());
    }

    #[test]
    fn test_bundle_text_format() {
        let text = bundle_text(&[review(0, "one"), review(1, "two")]);
        assert_eq!(text, "Review from alfa:\n\none\n\nReview from bravo:\n\ntwo\n\n");
    }
}
