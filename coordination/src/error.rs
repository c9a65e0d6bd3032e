//! Error taxonomy for review sessions.
//!
//! | Error                | Scope          | Handling                                     |
//! |----------------------|----------------|----------------------------------------------|
//! | `BackendError`       | one call       | degrades that reviewer (or the meta-review)  |
//! | `ConfigurationError` | whole session  | fatal, raised before any backend call         |
//! | empty input          | meta-review    | reported via `MetaReviewStatus::EmptyInput`   |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("backend returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("backend returned an empty response")]
    EmptyResponse,

    #[error("malformed response: {message}")]
    Malformed { message: String },

    #[error("no response within {after:?}")]
    Timeout {
        #[serde(with = "duration_secs")]
        after: Duration,
    },

    #[error("model not configured: {model}")]
    UnknownModel { model: String },

    #[error("API key not configured for {provider}")]
    MissingApiKey { provider: String },
}

impl BackendError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            message: err.to_string(),
        }
    }
}

/// Session configuration problems. Always raised before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{template} prompt template is missing the {placeholder} placeholder")]
    MissingPlaceholder {
        template: &'static str,
        placeholder: &'static str,
    },

    #[error("no reviewer models configured")]
    NoReviewers,

    #[error("reviewer model at position {0} is blank")]
    BlankReviewerModel(usize),

    #[error("no meta-reviewer model configured")]
    NoMetaReviewer,

    #[error("similarity threshold must be within (0, 1], got {0}")]
    InvalidThreshold(String),
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
