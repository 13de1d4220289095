//! Context Compaction
//!
//! Keeps the story-so-far context bounded as the manuscript grows.
//!
//! ## Features
//!
//! - **Single slot**: one [`RollingSummary`] per job, replaced after each accepted unit
//! - **Hard bound**: the slot never holds more than [`ContextBudget`] characters,
//!   even when the summarizer ignores the budget it was given
//!
//! ## Configuration
//!
//! The budget can be set in `quill.toml`:
//!
//! ```toml
//! [pipeline]
//! context_budget = "2k"   # or "2000", "2000 chars"
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let compactor = ContextCompactor::new(summarizer, policy);
//! let mut summary = RollingSummary::new(budget);
//! let report = compactor.compact(&mut summary, &accepted.text, &cancel).await?;
//! ```

mod budget;
mod compactor;
mod summary;

pub use budget::{ContextBudget, parse_context_budget};
pub use compactor::{CompactionReport, ContextCompactor};
pub use summary::{Replacement, RollingSummary};

/// Default rolling-summary budget in characters.
pub const DEFAULT_CONTEXT_BUDGET_CHARS: usize = 2000;
