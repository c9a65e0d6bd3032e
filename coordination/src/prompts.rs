//! Prompt templates for reviewers and the meta-reviewer.
//!
//! Templates use literal `{paper_text}` / `{reviews_text}` placeholders.
//! Substitution is a plain string replace, so other braces in a template
//! are left alone.

use crate::error::ConfigurationError;

/// Placeholder for the paper body in the review template.
pub const PAPER_TEXT_PLACEHOLDER: &str = "{paper_text}";

/// Placeholder for the review bundle in the meta-review template.
pub const REVIEWS_TEXT_PLACEHOLDER: &str = "{reviews_text}";

/// Section marker the meta-reviewer uses for its machine-readable table.
pub const CONCERNS_TABLE_MARKER: &str = "CONCERNS_TABLE_DATA";

/// Default system prompt sent with every request.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a neuroscientist and expert in brain imaging.";

/// Default review prompt.
pub const DEFAULT_REVIEW_PROMPT: &str = "You are a neuroscientist and expert in brain imaging who has been asked to provide a peer review for a submitted research paper, which is attached here. \
Please provide a thorough and critical review of the paper. \
First provide a summary of the study and its results, and then provide a detailed point-by-point analysis of any flaws in the study.\n\n\
Format the point-by-point analysis under a heading named \"Concerns\", as a numbered list with one concern per item. \
Where it helps, start an item with a short category label followed by a colon (for example \"Methodology:\").\n\n\
Here is the paper to review:\n\n{paper_text}";

/// Default meta-review prompt.
pub const DEFAULT_METAREVIEW_PROMPT: &str = "The attached files contain peer reviews of a research article. \
Please summarize these into a meta-review, highlighting both the common points raised across reviewers as well as any specific concerns that were only raised by some reviewers. \
Then rank the reviews in terms of their usefulness and identification of critical issues. \
List all major issues raised by any reviewer in the meta-review.\n\n\
After the meta-review, add a section titled 'CONCERNS_TABLE_DATA' that contains a JSON object representing a table of concerns. \
Each row represents a distinct concern and each column a reviewer. Use this format:\n\n\
```json\n\
{\n  \"concerns\": [\n    {\n      \"concern\": \"Brief description of concern 1\",\n      \"alfa\": true,\n      \"bravo\": false\n    }\n  ]\n}\n\
```\n\n\
Throughout the meta-review, refer to reviewers by their assigned NATO phonetic alphabet names (e.g., alfa, bravo, charlie).\n\n\
{reviews_text}";

/// Check that `template` contains `placeholder`.
pub fn require_placeholder(
    template: &str,
    template_name: &'static str,
    placeholder: &'static str,
) -> Result<(), ConfigurationError> {
    if template.contains(placeholder) {
        Ok(())
    } else {
        Err(ConfigurationError::MissingPlaceholder {
            template: template_name,
            placeholder,
        })
    }
}

/// Substitute the paper text into a review template.
pub fn render_review_prompt(template: &str, paper_text: &str) -> Result<String, ConfigurationError> {
    require_placeholder(template, "review", PAPER_TEXT_PLACEHOLDER)?;
    Ok(template.replace(PAPER_TEXT_PLACEHOLDER, paper_text))
}

/// Substitute the review bundle into a meta-review template.
pub fn render_metareview_prompt(
    template: &str,
    reviews_text: &str,
) -> Result<String, ConfigurationError> {
    require_placeholder(template, "metareview", REVIEWS_TEXT_PLACEHOLDER)?;
    Ok(template.replace(REVIEWS_TEXT_PLACEHOLDER, reviews_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_review_prompt_renders() {
        let prompt = render_review_prompt(DEFAULT_REVIEW_PROMPT, "This is a sample paper.").unwrap();
        assert!(prompt.ends_with("This is a sample paper."));
        assert!(prompt.contains("neuroscientist and expert in brain imaging"));
        assert!(prompt.contains("provide a thorough and critical review"));
        assert!(prompt.contains("summary of the study"));
        assert!(prompt.contains("point-by-point analysis"));
        assert!(!prompt.contains(PAPER_TEXT_PLACEHOLDER));
    }

    #[test]
    fn test_default_metareview_prompt_renders() {
        let prompt = render_metareview_prompt(DEFAULT_METAREVIEW_PROMPT, "Review from alfa:\n\nok").unwrap();
        assert!(prompt.contains("meta-review"));
        assert!(prompt.contains("common points"));
        assert!(prompt.contains("specific concerns"));
        assert!(prompt.contains(CONCERNS_TABLE_MARKER));
        assert!(prompt.ends_with("Review from alfa:\n\nok"));
    }

    #[test]
    fn test_missing_placeholder_is_configuration_error() {
        let err = render_review_prompt("Review this paper please", "X").unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingPlaceholder {
                template: "review",
                placeholder: PAPER_TEXT_PLACEHOLDER,
            }
        );
        assert!(render_metareview_prompt("Summarize: {paper_text}", "X").is_err());
    }

    #[test]
    fn test_literal_braces_survive() {
        let prompt = render_review_prompt("Return {\"a\": 1} for {paper_text}", "X").unwrap();
        assert_eq!(prompt, "Return {\"a\": 1} for X");
    }

    #[test]
    fn test_minimal_template() {
        assert_eq!(render_review_prompt("Review: {paper_text}", "X").unwrap(), "Review: X");
    }
}
