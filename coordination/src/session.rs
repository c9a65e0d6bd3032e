//! Review session driver and result assembly.
//!
//! ```text
//! validate config ──▶ registry ──▶ dispatch (barrier) ──┬─▶ anonymize ──▶ synthesize
//!                                                       └─▶ extract concerns
//!                                  assemble SessionResult ◀──┘
//! ```
//!
//! Every configuration check runs before the first backend call, so a bad
//! template or an empty model list never costs a request.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::anonymize::{AliasTable, Anonymizer, DEFAULT_PLACEHOLDER};
use crate::backend::SharedBackend;
use crate::concerns::{Concern, ConcernsConfig, ConcernsExtractor};
use crate::dispatch::{ReviewDispatcher, ReviewRequest, ReviewResult, DEFAULT_CALL_TIMEOUT};
use crate::error::ConfigurationError;
use crate::prompts::{
    require_placeholder, DEFAULT_METAREVIEW_PROMPT, DEFAULT_REVIEW_PROMPT,
    PAPER_TEXT_PLACEHOLDER,
};
use crate::registry::{self, Reviewer, ReviewerId, ReviewerRegistry};
use crate::synthesis::{MetaReview, MetaReviewStatus, MetaReviewSynthesizer};

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Run the meta-review stage.
    pub meta_review: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { meta_review: true }
    }
}

/// Everything one session needs besides the paper and the backend.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reviewer_models: Vec<String>,
    pub meta_reviewer_model: String,
    pub review_prompt: String,
    pub metareview_prompt: String,
    pub aliases: AliasTable,
    pub placeholder: String,
    pub concerns: ConcernsConfig,
    pub call_timeout: Duration,
    pub options: SessionOptions,
}

impl SessionConfig {
    /// Default prompts and tuning for the given models.
    pub fn new(reviewer_models: Vec<String>, meta_reviewer_model: impl Into<String>) -> Self {
        Self {
            reviewer_models,
            meta_reviewer_model: meta_reviewer_model.into(),
            review_prompt: DEFAULT_REVIEW_PROMPT.to_string(),
            metareview_prompt: DEFAULT_METAREVIEW_PROMPT.to_string(),
            aliases: AliasTable::builtin(),
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            concerns: ConcernsConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            options: SessionOptions::default(),
        }
    }

    /// Check everything that can be checked without a backend.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.reviewer_models.is_empty() {
            return Err(ConfigurationError::NoReviewers);
        }
        if let Some(position) = self.reviewer_models.iter().position(|m| m.trim().is_empty()) {
            return Err(ConfigurationError::BlankReviewerModel(position));
        }
        require_placeholder(&self.review_prompt, "review", PAPER_TEXT_PLACEHOLDER)?;
        self.concerns.validate()
    }
}

/// Final, fully assembled output of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reviewers: Vec<Reviewer>,
    /// One entry per reviewer, in reviewer order.
    pub reviews: Vec<ReviewResult>,
    pub meta_review: Option<MetaReview>,
    pub meta_review_status: MetaReviewStatus,
    pub concerns: Vec<Concern>,
}

/// One concern with a raised/not-raised flag per reviewer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcernRow<'a> {
    pub concern: &'a Concern,
    /// Parallel to `SessionResult::reviewers`.
    pub raised: Vec<bool>,
}

impl SessionResult {
    /// Identity → model mapping. Provenance only; never fed back into
    /// synthesis.
    pub fn code_to_model(&self) -> BTreeMap<ReviewerId, String> {
        registry::code_to_model(&self.reviewers)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ReviewResult> {
        self.reviews.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ReviewResult> {
        self.reviews.iter().filter(|r| !r.is_success())
    }

    pub fn concern_matrix(&self) -> Vec<ConcernRow<'_>> {
        self.concerns
            .iter()
            .map(|concern| ConcernRow {
                concern,
                raised: self
                    .reviewers
                    .iter()
                    .map(|r| concern.is_raised_by(&r.id))
                    .collect(),
            })
            .collect()
    }
}

/// Runs reviews, meta-review and concern extraction for one paper.
pub struct ReviewSession {
    backend: SharedBackend,
    config: SessionConfig,
}

impl ReviewSession {
    pub fn new(backend: SharedBackend, config: SessionConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn synthesizer(&self) -> MetaReviewSynthesizer {
        MetaReviewSynthesizer::new(
            self.backend.clone(),
            self.config.meta_reviewer_model.clone(),
            self.config.metareview_prompt.clone(),
        )
        .with_call_timeout(self.config.call_timeout)
    }

    /// Run the whole pipeline over `paper_text`.
    ///
    /// Only configuration problems are errors. Backend failures are
    /// recorded per reviewer, and a missing meta-review is explained by
    /// `meta_review_status`.
    pub async fn run(&self, paper_text: &str) -> Result<SessionResult, ConfigurationError> {
        self.run_with_existing(paper_text, &BTreeMap::new()).await
    }

    /// Run the pipeline, taking reviews already on hand from `existing`
    /// (keyed by reviewer code) instead of calling their backends.
    pub async fn run_with_existing(
        &self,
        paper_text: &str,
        existing: &BTreeMap<ReviewerId, String>,
    ) -> Result<SessionResult, ConfigurationError> {
        self.config.validate()?;
        let synthesizer = self.synthesizer();
        if self.config.options.meta_review {
            synthesizer.validate()?;
        }

        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let registry = ReviewerRegistry::assign(&self.config.reviewer_models);
        info!(
            %session_id,
            reviewers = registry.len(),
            distinct_models = registry.distinct_models().len(),
            meta_review = self.config.options.meta_review,
            "starting review session"
        );

        let request = ReviewRequest::new(paper_text, self.config.review_prompt.clone());
        let reviews = ReviewDispatcher::new(self.backend.clone())
            .with_call_timeout(self.config.call_timeout)
            .dispatch_pending(&request, registry.reviewers(), existing)
            .await?;

        let (meta_review, meta_review_status) = if self.config.options.meta_review {
            let anonymizer = Anonymizer::new(self.config.aliases.clone())
                .with_placeholder(self.config.placeholder.clone());
            let bundle = anonymizer.anonymize_all(&reviews);
            let outcome = synthesizer.synthesize(&bundle).await?;
            let status = outcome.status();
            (outcome.into_meta_review(), status)
        } else {
            (None, MetaReviewStatus::Disabled)
        };

        if let MetaReviewStatus::Failed { reason } = &meta_review_status {
            warn!(%session_id, reason = %reason, "session finished without meta-review");
        }

        let concerns = ConcernsExtractor::new(self.config.concerns).extract(&reviews);

        let result = SessionResult {
            session_id,
            started_at,
            finished_at: Utc::now(),
            reviewers: registry.into_reviewers(),
            reviews,
            meta_review,
            meta_review_status,
            concerns,
        };
        info!(
            %session_id,
            succeeded = result.succeeded().count(),
            failed = result.failed().count(),
            concerns = result.concerns.len(),
            meta_review = result.meta_review.is_some(),
            "review session complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::sync::Arc;

    fn session_with(config: SessionConfig) -> ReviewSession {
        let mut backend = MockBackend::new();
        backend.expect_generate().never();
        ReviewSession::new(Arc::new(backend), config)
    }

    fn config() -> SessionConfig {
        SessionConfig::new(vec!["m1".into(), "m2".into()], "meta")
    }

    #[tokio::test]
    async fn test_empty_model_list_is_rejected_without_calls() {
        let session = session_with(SessionConfig::new(vec![], "meta"));
        let err = session.run("paper").await.unwrap_err();
        assert_eq!(err, ConfigurationError::NoReviewers);
    }

    #[tokio::test]
    async fn test_blank_model_is_rejected() {
        let session = session_with(SessionConfig::new(vec!["m1".into(), " ".into()], "meta"));
        let err = session.run("paper").await.unwrap_err();
        assert_eq!(err, ConfigurationError::BlankReviewerModel(1));
    }

    #[tokio::test]
    async fn test_bad_templates_are_rejected_before_dispatch() {
        let mut bad_review = config();
        bad_review.review_prompt = "Review this".into();
        assert!(matches!(
            session_with(bad_review).run("paper").await,
            Err(ConfigurationError::MissingPlaceholder { template: "review", .. })
        ));

        let mut bad_meta = config();
        bad_meta.metareview_prompt = "Summarize {paper_text}".into();
        assert!(matches!(
            session_with(bad_meta).run("paper").await,
            Err(ConfigurationError::MissingPlaceholder { template: "metareview", .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_meta_reviewer_is_rejected() {
        let session = session_with(SessionConfig::new(vec!["m1".into()], ""));
        assert_eq!(
            session.run("paper").await.unwrap_err(),
            ConfigurationError::NoMetaReviewer
        );
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_rejected() {
        let mut config = config();
        config.concerns.similarity_threshold = 0.0;
        assert!(matches!(
            session_with(config).run("paper").await,
            Err(ConfigurationError::InvalidThreshold(_))
        ));
    }

    #[tokio::test]
    async fn test_meta_review_disabled_skips_meta_checks_and_call() {
        let mut backend = MockBackend::new();
        backend
            .expect_generate()
            .withf(|model: &str, _prompt: &str| model == "m1")
            .times(1)
            .returning(|_, _| Ok("1. Missing controls for the main effect.".into()));

        let mut config = SessionConfig::new(vec!["m1".into()], "");
        config.options.meta_review = false;

        let result = ReviewSession::new(Arc::new(backend), config)
            .run("paper")
            .await
            .unwrap();

        assert_eq!(result.meta_review_status, MetaReviewStatus::Disabled);
        assert!(result.meta_review.is_none());
        assert_eq!(result.concerns.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_reviews_are_not_requested_again() {
        let mut backend = MockBackend::new();
        backend
            .expect_generate()
            .withf(|model: &str, _prompt: &str| model == "m2")
            .times(1)
            .returning(|_, _| Ok("- Effect sizes are not reported.".into()));

        let mut config = config();
        config.options.meta_review = false;
        let existing = BTreeMap::from([(
            ReviewerId::for_slot(0),
            "- Motion correction is not described.".to_string(),
        )]);

        let result = ReviewSession::new(Arc::new(backend), config)
            .run_with_existing("paper", &existing)
            .await
            .unwrap();

        assert_eq!(result.succeeded().count(), 2);
        assert_eq!(
            result.reviews[0].text(),
            Some("- Motion correction is not described.")
        );
        assert_eq!(result.concerns.len(), 2);
    }
}
