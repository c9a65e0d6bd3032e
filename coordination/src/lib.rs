//! Review orchestration core.
//!
//! This library provides:
//! - An anonymous reviewer registry (NATO phonetic codes per model slot)
//! - Parallel review dispatch over any [`Backend`] with per-call timeouts
//! - Anonymization of review texts before synthesis
//! - Meta-review synthesis by a designated meta-reviewer
//! - A concerns matrix extracted from the raw reviews
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use coordination::{Backend, ReviewSession, SessionConfig};
//! # async fn run(backend: Arc<dyn Backend>) -> Result<(), coordination::ConfigurationError> {
//! let config = SessionConfig::new(vec!["gpt-4o".into(), "claude-3-7-sonnet".into()], "gpt-4o");
//! let result = ReviewSession::new(backend, config).run("paper text").await?;
//! for row in result.concern_matrix() {
//!     println!("{} {:?}", row.concern.description, row.raised);
//! }
//! # Ok(())
//! # }
//! ```

pub mod anonymize;
pub mod backend;
pub mod concerns;
pub mod dispatch;
pub mod error;
pub mod prompts;
pub mod registry;
pub mod session;
pub mod synthesis;

// Re-export key pipeline types
pub use anonymize::{AliasGroup, AliasTable, AnonymizedReview, Anonymizer};
pub use backend::{Backend, SharedBackend};
pub use concerns::{Concern, ConcernsConfig, ConcernsExtractor};
pub use dispatch::{ReviewDispatcher, ReviewRequest, ReviewResult, ReviewStatus};
pub use error::{BackendError, ConfigurationError};
pub use registry::{Reviewer, ReviewerId, ReviewerRegistry};
pub use session::{ConcernRow, ReviewSession, SessionConfig, SessionOptions, SessionResult};
pub use synthesis::{
    MetaReview, MetaReviewStatus, MetaReviewSynthesizer, ReportedConcern, SynthesisOutcome,
};
