//! Run a paper past several LLM reviewers at once.
//!
//! The review pipeline itself lives in the `coordination` crate; this crate
//! supplies the concrete collaborators around it: configuration, HTTP
//! providers, paper loading, the output directory and the CLI.

pub mod cli;
pub mod config;
pub mod output;
pub mod paper;
pub mod providers;
pub mod telemetry;

pub use config::PeerReviewConfig;
pub use output::OutputSink;
pub use paper::{load_paper, Paper, PaperError};
pub use providers::{ProviderClient, ProviderRouter};
