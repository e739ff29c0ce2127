//! Level-1 (multiple choice) matching.
//!
//! Normalisation is whitespace trim plus ASCII upper-case, nothing else:
//! `"C."` and `"C) Paris"` do not match `C`.

use crate::model::{TaskId, TaskOutcome, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceMatch {
    pub verdict: Verdict,
    /// Candidate after normalisation.
    pub normalized: String,
    /// False when the candidate is not a single letter A-D.
    pub well_formed: bool,
}

impl ChoiceMatch {
    /// Validation warning for malformed candidates.
    pub fn warning(&self, task: &TaskId) -> Option<String> {
        (!self.well_formed).then(|| {
            format!(
                "{task}: answer '{}' is not a single letter A-D",
                self.normalized
            )
        })
    }

    pub fn into_outcome(self, expected: char) -> TaskOutcome {
        TaskOutcome::Choice {
            verdict: self.verdict,
            given: self.normalized,
            expected,
        }
    }
}

pub fn match_choice(candidate: &str, expected: char) -> ChoiceMatch {
    let normalized = candidate.trim().to_ascii_uppercase();
    let mut chars = normalized.chars();
    let letter = match (chars.next(), chars.next()) {
        (Some(c @ 'A'..='D'), None) => Some(c),
        _ => None,
    };
    ChoiceMatch {
        verdict: Verdict::from_bool(letter == Some(expected.to_ascii_uppercase())),
        well_formed: letter.is_some(),
        normalized,
    }
}
