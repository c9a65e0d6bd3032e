//! Writes a finished session to `<output_dir>/<paper stem>/`.
//!
//! | File                 | Content                                         |
//! |----------------------|-------------------------------------------------|
//! | `review_<code>.md`   | raw text of each successful review              |
//! | `meta_review.md`     | meta-review report plus the reviewer key        |
//! | `concerns_table.csv` | one row per concern, one column per reviewer    |
//! | `results.json`       | the complete `SessionResult`                    |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use tracing::{info, warn};

use coordination::{MetaReviewStatus, Reviewer, ReviewerId, SessionResult};

pub const META_REVIEW_FILE: &str = "meta_review.md";
pub const CONCERNS_FILE: &str = "concerns_table.csv";
pub const RESULTS_FILE: &str = "results.json";

/// Directory that receives one session's files.
#[derive(Debug, Clone)]
pub struct OutputSink {
    dir: PathBuf,
}

impl OutputSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<base>/<paper stem>`.
    pub fn for_paper(base: &Path, stem: &str) -> Self {
        Self::new(base.join(stem))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every output file; returns the paths written.
    pub fn write(&self, result: &SessionResult) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create output directory {}", self.dir.display()))?;

        let mut written = Vec::new();

        for review in result.succeeded() {
            let Some(text) = review.text() else {
                continue;
            };
            let path = self.review_path(&review.reviewer.id);
            write_file(&path, text)?;
            written.push(path);
        }

        if let Some(report) = render_meta_review(result) {
            let path = self.dir.join(META_REVIEW_FILE);
            write_file(&path, &report)?;
            written.push(path);
        }

        let path = self.dir.join(CONCERNS_FILE);
        write_file(&path, &render_concerns_csv(result))?;
        written.push(path);

        let json = serde_json::to_string_pretty(result).context("Failed to serialize session result")?;
        let path = self.dir.join(RESULTS_FILE);
        write_file(&path, &json)?;
        written.push(path);

        info!(dir = %self.dir.display(), files = written.len(), "session output written");
        Ok(written)
    }
}

impl OutputSink {
    /// Reviews a previous run left in this directory, keyed by reviewer code.
    ///
    /// A `review_<code>.md` file is only taken when the previous
    /// `results.json` shows the same model behind that code; codes are
    /// positional, so a changed model list must not pick up another model's
    /// review. Missing or unreadable files just mean nothing is reused.
    pub fn existing_reviews(&self, reviewers: &[Reviewer]) -> BTreeMap<ReviewerId, String> {
        let mut reused = BTreeMap::new();
        let Some(previous) = self.previous_result() else {
            return reused;
        };
        let previous_models = previous.code_to_model();

        for reviewer in reviewers {
            if previous_models.get(&reviewer.id) != Some(&reviewer.model_identifier) {
                continue;
            }
            let path = self.review_path(&reviewer.id);
            match std::fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    info!(reviewer = %reviewer.id, path = %path.display(), "reusing existing review");
                    reused.insert(reviewer.id.clone(), text);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "existing review unreadable"),
            }
        }
        reused
    }

    fn previous_result(&self) -> Option<SessionResult> {
        let path = self.dir.join(RESULTS_FILE);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparseable previous results");
                None
            }
        }
    }

    fn review_path(&self, id: &ReviewerId) -> PathBuf {
        self.dir.join(format!("review_{id}.md"))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Meta-review report followed by the reviewer key, or `None` when no
/// meta-review was produced.
pub fn render_meta_review(result: &SessionResult) -> Option<String> {
    let meta = result.meta_review.as_ref()?;
    let mut out = String::new();
    out.push_str(meta.text.trim_end());
    out.push_str("\n\n---\n\n## Reviewer key\n\n| Reviewer | Model | Status |\n|---|---|---|\n");
    for review in &result.reviews {
        let status = match review.failure_reason() {
            Some(reason) => format!("failed: {}", reason.replace('|', "\\|")),
            None => "ok".to_string(),
        };
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            review.reviewer.id, review.reviewer.model_identifier, status
        ));
    }
    out.push_str(&format!(
        "\nSession {} finished {}\n",
        result.session_id,
        result.finished_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    Some(out)
}

/// `concern,category,<code>...` with `true`/`false` cells.
pub fn render_concerns_csv(result: &SessionResult) -> String {
    let mut header = vec!["concern".to_string(), "category".to_string()];
    header.extend(result.reviewers.iter().map(|r| r.id.to_string()));

    let mut out = csv_line(&header);
    for row in result.concern_matrix() {
        let mut cells = vec![row.concern.description.clone(), row.concern.category.clone()];
        cells.extend(row.raised.iter().map(|raised| raised.to_string()));
        out.push_str(&csv_line(&cells));
    }
    out
}

fn csv_line(cells: &[String]) -> String {
    let mut line = cells
        .iter()
        .map(|cell| csv_field(cell))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One-line human summary for the terminal.
pub fn summary_line(result: &SessionResult) -> String {
    let meta = match &result.meta_review_status {
        MetaReviewStatus::Completed => "meta-review completed".to_string(),
        MetaReviewStatus::Disabled => "meta-review disabled".to_string(),
        MetaReviewStatus::EmptyInput => "meta-review skipped (no successful reviews)".to_string(),
        MetaReviewStatus::Failed { reason } => format!("meta-review failed: {reason}"),
    };
    format!(
        "{}/{} reviews succeeded, {} concerns, {}",
        result.succeeded().count(),
        result.reviews.len(),
        result.concerns.len(),
        meta
    )
}
