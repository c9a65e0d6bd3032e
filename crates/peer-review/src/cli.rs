//! Command-line interface.
//!
//! ```bash
//! peer-review review paper.txt --models gpt4-o1,claude-3.7-sonnet --output-dir ./papers
//! peer-review review paper.md --no-meta-review --overwrite
//! peer-review list-models
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use coordination::{ReviewSession, ReviewerRegistry, SessionOptions, SessionResult, SharedBackend};

use crate::config::PeerReviewConfig;
use crate::output::{summary_line, OutputSink};
use crate::paper::load_paper;
use crate::providers::ProviderRouter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "peer-review", author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./peer-review.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Review a paper with every configured model and synthesize a meta-review
    Review(ReviewArgs),
    /// List the models the catalog knows about
    ListModels,
}

#[derive(Args, Debug, Clone)]
pub struct ReviewArgs {
    /// Paper as plain text or markdown
    pub paper: PathBuf,

    /// Base directory; results go to <output-dir>/<paper stem>/
    #[arg(long, default_value = "./papers")]
    pub output_dir: PathBuf,

    /// Comma-separated reviewer models (repeats allowed)
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Model that writes the meta-review
    #[arg(long)]
    pub meta_reviewer: Option<String>,

    /// Skip the meta-review stage
    #[arg(long, default_value_t = false)]
    pub no_meta_review: bool,

    /// Per-call timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Request every review again instead of reusing review files from a
    /// previous run with the same models
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

impl ReviewArgs {
    /// Fold flag values into the loaded configuration.
    pub fn apply_to(&self, config: &mut PeerReviewConfig) {
        let models: Vec<String> = self
            .models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if !models.is_empty() {
            config.reviewer_models = models;
        }
        if let Some(model) = &self.meta_reviewer {
            config.meta_reviewer_model = model.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = secs;
        }
    }

    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            meta_review: !self.no_meta_review,
        }
    }
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = PeerReviewConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Review(args) => {
            args.apply_to(&mut config);
            config.validate()?;
            let router = ProviderRouter::from_config(&config)?;
            let (result, dir) = review(&config, &args, Arc::new(router)).await?;

            println!("{}", summary_line(&result));
            println!("Output written to {}", dir.display());
            if result.succeeded().count() == 0 {
                bail!("all {} reviewers failed", result.reviews.len());
            }
            Ok(())
        }
        Command::ListModels => {
            let router = ProviderRouter::from_config(&config)?;
            println!("Available models for peer review:");
            for model in router.catalog() {
                let key = if model.key_configured { "" } else { "  (no API key)" };
                println!(
                    "- {:<20} {}:{}{}",
                    model.name, model.provider, model.api_model, key
                );
            }
            println!(
                "\nOther names are sent to the '{}' provider unchanged.",
                config.default_provider
            );
            Ok(())
        }
    }
}

/// Run one review session and write its output. Returns the result and the
/// directory it was written to.
pub async fn review(
    config: &PeerReviewConfig,
    args: &ReviewArgs,
    backend: SharedBackend,
) -> Result<(SessionResult, PathBuf)> {
    let paper = load_paper(&args.paper)?;
    info!(
        paper = %paper.path.display(),
        chars = paper.text.len(),
        reviewers = config.reviewer_models.len(),
        "loaded paper"
    );

    let sink = OutputSink::for_paper(&args.output_dir, &paper.stem);
    let existing = if args.overwrite {
        BTreeMap::new()
    } else {
        let reviewers = ReviewerRegistry::assign(&config.reviewer_models).into_reviewers();
        sink.existing_reviews(&reviewers)
    };
    if !existing.is_empty() {
        info!(reused = existing.len(), "reusing reviews from previous run (--overwrite to redo)");
    }

    let session = ReviewSession::new(backend, config.session_config(args.options()));
    let result = session
        .run_with_existing(&paper.text, &existing)
        .await
        .context("Invalid review configuration")?;

    sink.write(&result)?;
    Ok((result, sink.dir().to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_review() {
        let cli = parse(&[
            "peer-review",
            "review",
            "paper.txt",
            "--models",
            "gpt-4o,gpt-4o,deepseek-r1",
            "--meta-reviewer",
            "claude-3.7-sonnet",
            "--no-meta-review",
        ]);
        let Command::Review(args) = cli.command else {
            panic!("expected review command");
        };
        assert_eq!(args.paper, PathBuf::from("paper.txt"));
        assert_eq!(args.models, vec!["gpt-4o", "gpt-4o", "deepseek-r1"]);
        assert_eq!(args.output_dir, PathBuf::from("./papers"));
        assert!(!args.options().meta_review);
        assert!(!args.overwrite);
    }

    #[test]
    fn test_parse_list_models_with_global_config() {
        let cli = parse(&["peer-review", "list-models", "--config", "x.toml", "-v"]);
        assert!(matches!(cli.command, Command::ListModels));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_review_requires_paper() {
        assert!(Cli::try_parse_from(["peer-review", "review"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "peer-review",
            "review",
            "p.md",
            "--models",
            " a , b",
            "--timeout-secs",
            "30",
            "--overwrite",
        ]);
        let Command::Review(args) = cli.command else {
            panic!("expected review command");
        };

        let mut config = PeerReviewConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.reviewer_models, vec!["a", "b"]);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.meta_reviewer_model, PeerReviewConfig::default().meta_reviewer_model);
        assert!(args.options().meta_review);
        assert!(args.overwrite);
    }
}
