//! The single rolling-summary slot.

use serde::{Deserialize, Serialize};

use super::budget::ContextBudget;

/// Story-so-far digest with a hard size bound.
///
/// There is exactly one value at any time: `replace` swaps it out, nothing
/// ever appends. The text never exceeds `budget` characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSummary {
    text: String,
    budget: usize,
    /// Number of replacements performed (one per accepted unit).
    replacements: u32,
}

/// Result of replacing the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacement {
    /// Size of the stored summary in characters.
    pub chars: usize,
    /// Characters dropped to honor the budget (0 when it already fit).
    pub dropped_chars: usize,
}

impl Replacement {
    pub fn truncated(&self) -> bool {
        self.dropped_chars > 0
    }
}

impl RollingSummary {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            text: String::new(),
            budget: budget.chars(),
            replacements: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chars(&self) -> usize {
        self.text.chars().count()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn replacements(&self) -> u32 {
        self.replacements
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whether the stored text honors the budget. Always true for values
    /// built through `replace`; checked when state is loaded from disk.
    pub fn within_budget(&self) -> bool {
        self.budget > 0 && self.chars() <= self.budget
    }

    /// Change the budget, truncating the current text if it no longer fits.
    /// Not counted as a replacement.
    pub fn set_budget(&mut self, budget: ContextBudget) -> Replacement {
        self.budget = budget.chars();
        let total = self.text.chars().count();
        let kept = tail_within(&self.text, self.budget).to_string();
        self.text = kept;
        let chars = self.text.chars().count();
        Replacement {
            chars,
            dropped_chars: total - chars,
        }
    }

    /// Replace the summary, truncating to the budget if needed.
    ///
    /// Truncation keeps the tail (the most recent events) and starts on a
    /// word boundary when one exists inside the kept window.
    pub fn replace(&mut self, new_summary: &str) -> Replacement {
        let new_summary = new_summary.trim();
        let total = new_summary.chars().count();
        let kept = tail_within(new_summary, self.budget);
        self.text = kept.to_string();
        self.replacements += 1;
        let chars = self.text.chars().count();
        Replacement {
            chars,
            dropped_chars: total - chars,
        }
    }
}

/// Longest suffix of `text` with at most `max_chars` characters, trimmed to
/// start after a whitespace boundary when cutting mid-word.
fn tail_within(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let skip = total - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail = &text[start..];

    // Cut landed mid-word: drop the fragment if a later boundary exists.
    let prev_is_space = text[..start]
        .chars()
        .next_back()
        .is_some_and(char::is_whitespace);
    if !prev_is_space
        && let Some(ws) = tail.find(char::is_whitespace)
    {
        let rest = tail[ws..].trim_start();
        if !rest.is_empty() {
            return rest;
        }
    }
    tail.trim_start()
}
