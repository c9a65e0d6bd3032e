//! Anonymous reviewer identities for configured model slots.
//!
//! Codes are assigned purely by position: slot 0 is `alfa`, slot 1 is
//! `bravo`, and so on through the ten NATO codes below. Slots past the
//! tenth fall back to `reviewer_<n>` (1-based). The same model requested
//! twice gets two reviewers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed code sequence for the first reviewers of a session.
pub const NATO_CODES: [&str; 10] = [
    "alfa", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
];

/// Opaque anonymous reviewer code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(String);

impl ReviewerId {
    /// Code for the reviewer at `slot_index`.
    pub fn for_slot(slot_index: usize) -> Self {
        match NATO_CODES.get(slot_index) {
            Some(code) => Self((*code).to_string()),
            None => Self(format!("reviewer_{}", slot_index + 1)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One configured model slot under its anonymous identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub id: ReviewerId,
    pub model_identifier: String,
    pub slot_index: usize,
}

/// Ordered reviewer list for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerRegistry {
    reviewers: Vec<Reviewer>,
}

impl ReviewerRegistry {
    /// Assign identities to `models` in request order. Duplicates are kept.
    pub fn assign<S: AsRef<str>>(models: &[S]) -> Self {
        let reviewers = models
            .iter()
            .enumerate()
            .map(|(slot_index, model)| Reviewer {
                id: ReviewerId::for_slot(slot_index),
                model_identifier: model.as_ref().to_string(),
                slot_index,
            })
            .collect();
        Self { reviewers }
    }

    pub fn reviewers(&self) -> &[Reviewer] {
        &self.reviewers
    }

    pub fn into_reviewers(self) -> Vec<Reviewer> {
        self.reviewers
    }

    pub fn len(&self) -> usize {
        self.reviewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty()
    }

    /// Look up a reviewer by code.
    pub fn get(&self, id: &ReviewerId) -> Option<&Reviewer> {
        self.reviewers.iter().find(|r| &r.id == id)
    }

    /// Code → model identifier mapping, for provenance only.
    pub fn code_to_model(&self) -> BTreeMap<ReviewerId, String> {
        code_to_model(&self.reviewers)
    }

    /// Distinct model identifiers in first-seen order.
    pub fn distinct_models(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for reviewer in &self.reviewers {
            if !seen.contains(&reviewer.model_identifier.as_str()) {
                seen.push(&reviewer.model_identifier);
            }
        }
        seen
    }
}

pub(crate) fn code_to_model(reviewers: &[Reviewer]) -> BTreeMap<ReviewerId, String> {
    reviewers
        .iter()
        .map(|r| (r.id.clone(), r.model_identifier.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_preserves_order_and_duplicates() {
        let registry = ReviewerRegistry::assign(&["A", "A", "B"]);
        let reviewers = registry.reviewers();

        assert_eq!(reviewers.len(), 3);
        assert_eq!(reviewers[0].id.as_str(), "alfa");
        assert_eq!(reviewers[1].id.as_str(), "bravo");
        assert_eq!(reviewers[2].id.as_str(), "charlie");
        assert_eq!(reviewers[0].model_identifier, "A");
        assert_eq!(reviewers[1].model_identifier, "A");
        assert_eq!(reviewers[2].model_identifier, "B");
        assert_ne!(reviewers[0].id, reviewers[1].id);
        for (i, r) in reviewers.iter().enumerate() {
            assert_eq!(r.slot_index, i);
        }
    }

    #[test]
    fn test_codes_past_nato_sequence() {
        let models: Vec<String> = (0..12).map(|i| format!("m{i}")).collect();
        let registry = ReviewerRegistry::assign(&models);

        assert_eq!(registry.reviewers()[9].id.as_str(), "juliet");
        assert_eq!(registry.reviewers()[10].id.as_str(), "reviewer_11");
        assert_eq!(registry.reviewers()[11].id.as_str(), "reviewer_12");
    }

    #[test]
    fn test_codes_never_repeat() {
        let models = vec!["same"; 25];
        let registry = ReviewerRegistry::assign(&models);
        let mut ids: Vec<_> = registry.reviewers().iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25);
    }

    #[test]
    fn test_codes_do_not_depend_on_model_names() {
        let a = ReviewerRegistry::assign(&["gpt-4o", "claude-3-opus"]);
        let b = ReviewerRegistry::assign(&["llama", "gemini"]);
        let ids_a: Vec<_> = a.reviewers().iter().map(|r| &r.id).collect();
        let ids_b: Vec<_> = b.reviewers().iter().map(|r| &r.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_code_to_model_and_distinct_models() {
        let registry = ReviewerRegistry::assign(&["m1", "m1", "m2"]);
        let mapping = registry.code_to_model();
        assert_eq!(mapping[&ReviewerId::for_slot(1)], "m1");
        assert_eq!(mapping[&ReviewerId::for_slot(2)], "m2");
        assert_eq!(registry.distinct_models(), vec!["m1", "m2"]);
        assert!(registry.get(&ReviewerId::for_slot(3)).is_none());
    }
}
