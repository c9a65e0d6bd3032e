//! Uniform text-generation seam consumed by the dispatcher and synthesizer.
//!
//! Provider-specific request/response translation lives behind this trait;
//! the review core only ever sees `generate(model, prompt)`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;

/// A text generation backend addressed by model identifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit `prompt` to `model` and return the generated text.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError>;
}

/// Shared reference to a backend
pub type SharedBackend = Arc<dyn Backend>;

