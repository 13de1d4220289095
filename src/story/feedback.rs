//! Review output for a single draft.
//!
//! ```
//! use quill::story::{EditItem, EditSeverity, EditType, Feedback};
//!
//! let feedback = Feedback::rejected(0.55, "Tighten the opening paragraph.")
//!     .add_edit(EditItem::new(EditType::Pacing, EditSeverity::Required));
//!
//! assert!(!feedback.approved);
//! assert!(feedback.contract_problem().is_none());
//! assert_eq!(feedback.required_edits().count(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categories of editorial feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    Style,
    Continuity,
    CharacterVoice,
    Pacing,
    Clarity,
    Grammar,
    PlotHole,
}

/// How strongly the reviewer recommends the change.
///
/// Ordered from weakest to strongest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EditSeverity {
    #[default]
    Suggestion,
    Recommended,
    Required,
}

impl fmt::Display for EditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Suggestion => "suggestion",
            Self::Recommended => "recommended",
            Self::Required => "required",
        };
        write!(f, "{}", s)
    }
}

/// A single editorial note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditItem {
    pub edit_type: EditType,
    #[serde(default)]
    pub severity: EditSeverity,
    /// Approximate location, e.g. "paragraph 3".
    #[serde(default)]
    pub location_hint: String,
    #[serde(default)]
    pub original_text: String,
    #[serde(default)]
    pub suggested_text: String,
    #[serde(default)]
    pub rationale: String,
}

impl EditItem {
    pub fn new(edit_type: EditType, severity: EditSeverity) -> Self {
        Self {
            edit_type,
            severity,
            location_hint: String::new(),
            original_text: String::new(),
            suggested_text: String::new(),
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Reviewer verdict on one draft.
///
/// `approved` is set by the reviewer (typically by comparing its score to
/// the configured quality threshold). The quality gate reads only
/// `approved`; `quality_score` is validated but otherwise informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Must lie in `[0, 1]`.
    pub quality_score: f64,
    pub approved: bool,
    #[serde(default)]
    pub edit_items: Vec<EditItem>,
    /// High-level instructions for the next draft when not approved.
    #[serde(default)]
    pub revision_instructions: String,
    #[serde(default)]
    pub overall_assessment: String,
}

impl Feedback {
    pub fn approved(quality_score: f64) -> Self {
        Self {
            quality_score,
            approved: true,
            edit_items: Vec::new(),
            revision_instructions: String::new(),
            overall_assessment: String::new(),
        }
    }

    pub fn rejected(quality_score: f64, instructions: impl Into<String>) -> Self {
        Self {
            quality_score,
            approved: false,
            edit_items: Vec::new(),
            revision_instructions: instructions.into(),
            overall_assessment: String::new(),
        }
    }

    pub fn add_edit(mut self, item: EditItem) -> Self {
        self.edit_items.push(item);
        self
    }

    /// Returns a description of the contract breach, if any.
    ///
    /// A score outside `[0, 1]` (or NaN) is a breach. It is reported, never
    /// clamped.
    pub fn contract_problem(&self) -> Option<String> {
        if !self.quality_score.is_finite() || !(0.0..=1.0).contains(&self.quality_score) {
            return Some(format!(
                "quality_score {} outside [0, 1]",
                self.quality_score
            ));
        }
        None
    }

    pub fn required_edits(&self) -> impl Iterator<Item = &EditItem> {
        self.edit_items
            .iter()
            .filter(|e| e.severity == EditSeverity::Required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_problem_bounds() {
        assert!(Feedback::approved(0.0).contract_problem().is_none());
        assert!(Feedback::approved(1.0).contract_problem().is_none());
        assert!(Feedback::approved(1.4).contract_problem().is_some());
        assert!(Feedback::rejected(-0.01, "").contract_problem().is_some());
        assert!(Feedback::approved(f64::NAN).contract_problem().is_some());
    }

    #[test]
    fn test_contract_problem_does_not_clamp() {
        let fb = Feedback::approved(1.4);
        let _ = fb.contract_problem();
        assert_eq!(fb.quality_score, 1.4);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(EditSeverity::Required > EditSeverity::Recommended);
        assert!(EditSeverity::Recommended > EditSeverity::Suggestion);
        assert_eq!(EditSeverity::Required.to_string(), "required");
    }

    #[test]
    fn test_deserialize_minimal() {
        let fb: Feedback =
            serde_json::from_str(r#"{"quality_score": 0.8, "approved": true}"#).unwrap();
        assert!(fb.approved);
        assert!(fb.edit_items.is_empty());
    }

    #[test]
    fn test_edit_type_snake_case() {
        let item: EditItem =
            serde_json::from_str(r#"{"edit_type": "plot_hole", "severity": "required"}"#).unwrap();
        assert_eq!(item.edit_type, EditType::PlotHole);
        assert_eq!(item.severity, EditSeverity::Required);
    }
}
