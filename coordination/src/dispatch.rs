//! Review dispatcher: JoinSet fan-out/fan-in over the reviewer list.
//!
//! ```text
//! render prompt (once)
//!   JoinSet::spawn(backend.generate(model_i, prompt)) × N reviewers
//! join all → slot[i] = ReviewResult
//! ```
//!
//! ## Partial failure policy
//!
//! Every reviewer gets exactly one `ReviewResult`. Transport errors, bad
//! statuses, empty bodies, timeouts and even a panicking task degrade only
//! that reviewer's slot to `Failed`. The output order is the reviewer order,
//! whatever order the backends answer in.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::SharedBackend;
use crate::error::{BackendError, ConfigurationError};
use crate::prompts::render_review_prompt;
use crate::registry::{Reviewer, ReviewerId};

/// Default bound on a single backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// The paper and the template every reviewer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub paper_text: String,
    pub prompt_template: String,
}

impl ReviewRequest {
    pub fn new(paper_text: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            paper_text: paper_text.into(),
            prompt_template: prompt_template.into(),
        }
    }

    /// Template with the paper text substituted.
    pub fn render(&self) -> Result<String, ConfigurationError> {
        render_review_prompt(&self.prompt_template, &self.paper_text)
    }
}

/// Outcome of one reviewer's call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewStatus {
    Success,
    Failed { reason: String },
}

impl ReviewStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One reviewer's review, or why there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub reviewer: Reviewer,
    pub status: ReviewStatus,
    pub raw_text: Option<String>,
    /// Wall-clock time of the call in milliseconds.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ReviewResult {
    pub fn success(reviewer: Reviewer, text: String, elapsed: Duration) -> Self {
        Self {
            reviewer,
            status: ReviewStatus::Success,
            raw_text: Some(text),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(reviewer: Reviewer, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            reviewer,
            status: ReviewStatus::Failed {
                reason: reason.into(),
            },
            raw_text: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Review text, only for successful results.
    pub fn text(&self) -> Option<&str> {
        match self.status {
            ReviewStatus::Success => self.raw_text.as_deref(),
            ReviewStatus::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            ReviewStatus::Failed { reason } => Some(reason),
            ReviewStatus::Success => None,
        }
    }
}

/// Runs one review per reviewer against a shared backend.
pub struct ReviewDispatcher {
    backend: SharedBackend,
    call_timeout: Duration,
}

impl ReviewDispatcher {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Dispatch `request` to every reviewer concurrently.
    ///
    /// Only a template without `{paper_text}` is an error, and it is raised
    /// before any backend call. Backend failures never surface here.
    pub async fn dispatch(
        &self,
        request: &ReviewRequest,
        reviewers: &[Reviewer],
    ) -> Result<Vec<ReviewResult>, ConfigurationError> {
        self.dispatch_pending(request, reviewers, &BTreeMap::new()).await
    }

    /// Like [`dispatch`](Self::dispatch), but reviewers with a non-blank
    /// entry in `existing` take that text as a successful review and are
    /// not called.
    pub async fn dispatch_pending(
        &self,
        request: &ReviewRequest,
        reviewers: &[Reviewer],
        existing: &BTreeMap<ReviewerId, String>,
    ) -> Result<Vec<ReviewResult>, ConfigurationError> {
        let prompt: Arc<str> = Arc::from(request.render()?);

        let mut slots: Vec<Option<ReviewResult>> = vec![None; reviewers.len()];
        for (position, reviewer) in reviewers.iter().enumerate() {
            if let Some(text) = existing.get(&reviewer.id).filter(|t| !t.trim().is_empty()) {
                debug!(reviewer = %reviewer.id, "reusing existing review");
                slots[position] = Some(ReviewResult::success(
                    reviewer.clone(),
                    text.clone(),
                    Duration::ZERO,
                ));
            }
        }

        info!(
            reviewers = reviewers.len(),
            reused = slots.iter().filter(|s| s.is_some()).count(),
            timeout_secs = self.call_timeout.as_secs(),
            "dispatching review requests"
        );

        let mut join_set: JoinSet<(usize, ReviewResult)> = JoinSet::new();
        for (position, reviewer) in reviewers.iter().enumerate() {
            if slots[position].is_some() {
                continue;
            }
            let backend = self.backend.clone();
            let prompt = prompt.clone();
            let reviewer = reviewer.clone();
            let call_timeout = self.call_timeout;

            join_set.spawn(async move {
                let result = run_review(backend, reviewer, &prompt, call_timeout).await;
                (position, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, result)) => {
                    debug!(
                        reviewer = %result.reviewer.id,
                        success = result.is_success(),
                        elapsed_ms = result.elapsed_ms,
                        "review call finished"
                    );
                    slots[position] = Some(result);
                }
                Err(e) => {
                    // The slot stays empty and is filled as failed below.
                    warn!(error = %e, "review task panicked");
                }
            }
        }

        let results: Vec<ReviewResult> = slots
            .into_iter()
            .zip(reviewers)
            .map(|(slot, reviewer)| {
                slot.unwrap_or_else(|| {
                    ReviewResult::failed(reviewer.clone(), "review task aborted", Duration::ZERO)
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            succeeded,
            failed = results.len() - succeeded,
            "review dispatch complete"
        );

        Ok(results)
    }
}

async fn run_review(
    backend: SharedBackend,
    reviewer: Reviewer,
    prompt: &str,
    call_timeout: Duration,
) -> ReviewResult {
    let start = Instant::now();
    let call = backend.generate(&reviewer.model_identifier, prompt);

    let outcome = match tokio::time::timeout(call_timeout, call).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(BackendError::EmptyResponse),
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BackendError::Timeout {
            after: call_timeout,
        }),
    };

    match outcome {
        Ok(text) => ReviewResult::success(reviewer, text, start.elapsed()),
        Err(e) => {
            warn!(
                reviewer = %reviewer.id,
                model = %reviewer.model_identifier,
                error = %e,
                "review failed"
            );
            ReviewResult::failed(reviewer, e.to_string(), start.elapsed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::registry::ReviewerRegistry;
    use async_trait::async_trait;

    /// Answers with the model name after a per-model delay; "bad" fails,
    /// "slow" never answers in time, "boom" panics.
    struct DelayBackend;

    #[async_trait]
    impl Backend for DelayBackend {
        async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
            match model {
                "bad" => Err(BackendError::HttpStatus {
                    status: 500,
                    body: "down".into(),
                }),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".into())
                }
                "blank" => Ok("   ".into()),
                "boom" => panic!("backend bug"),
                m => {
                    let delay = if m == "first" { 50 } else { 1 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(format!("{m}: {prompt}"))
                }
            }
        }
    }

    fn dispatcher() -> ReviewDispatcher {
        ReviewDispatcher::new(Arc::new(DelayBackend)).with_call_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_output_order_matches_reviewer_order() {
        let registry = ReviewerRegistry::assign(&["first", "second", "third"]);
        let request = ReviewRequest::new("X", "Review: {paper_text}");

        let results = dispatcher()
            .dispatch(&request, registry.reviewers())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].text(), Some("first: Review: X"));
        assert_eq!(results[1].text(), Some("second: Review: X"));
        assert_eq!(results[2].text(), Some("third: Review: X"));
        for (result, reviewer) in results.iter().zip(registry.reviewers()) {
            assert_eq!(&result.reviewer, reviewer);
        }
    }

    #[tokio::test]
    async fn test_existing_reviews_skip_their_calls() {
        let registry = ReviewerRegistry::assign(&["first", "bad", "bad"]);
        let request = ReviewRequest::new("X", "{paper_text}");
        let existing = BTreeMap::from([
            (ReviewerId::for_slot(1), "kept from last run".to_string()),
            (ReviewerId::for_slot(2), "  \n".to_string()),
        ]);

        let results = dispatcher()
            .dispatch_pending(&request, registry.reviewers(), &existing)
            .await
            .unwrap();

        assert_eq!(results[0].text(), Some("first: X"));
        assert_eq!(results[1].text(), Some("kept from last run"));
        // Blank files do not count as reviews; the call is made and fails.
        assert!(results[2].failure_reason().unwrap().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_failures_are_recorded_per_reviewer() {
        let registry = ReviewerRegistry::assign(&["ok", "bad", "blank", "ok"]);
        let request = ReviewRequest::new("X", "{paper_text}");

        let results = dispatcher()
            .dispatch(&request, registry.reviewers())
            .await
            .unwrap();

        assert!(results[0].is_success());
        assert!(results[1]
            .failure_reason()
            .unwrap()
            .contains("HTTP 500"));
        assert!(results[1].raw_text.is_none());
        assert_eq!(
            results[2].failure_reason(),
            Some("backend returned an empty response")
        );
        assert!(results[3].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_only_the_slow_reviewer() {
        let registry = ReviewerRegistry::assign(&["slow", "ok"]);
        let request = ReviewRequest::new("X", "{paper_text}");

        let results = dispatcher()
            .dispatch(&request, registry.reviewers())
            .await
            .unwrap();

        assert!(results[0].failure_reason().unwrap().contains("no response within"));
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn test_panicking_task_degrades_its_slot() {
        let registry = ReviewerRegistry::assign(&["ok", "boom"]);
        let request = ReviewRequest::new("X", "{paper_text}");

        let results = dispatcher()
            .dispatch(&request, registry.reviewers())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[1].failure_reason(), Some("review task aborted"));
        assert_eq!(results[1].reviewer.id, registry.reviewers()[1].id);
    }

    #[tokio::test]
    async fn test_missing_placeholder_fails_before_dispatch() {
        let registry = ReviewerRegistry::assign(&["ok"]);
        let request = ReviewRequest::new("X", "Review this");

        let err = dispatcher()
            .dispatch(&request, registry.reviewers())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingPlaceholder { .. }));
    }

    #[test]
    fn test_review_status_serialization() {
        let json = serde_json::to_value(ReviewStatus::Failed {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "timeout");
    }
}
