//! Summarize-and-replace step run once per accepted unit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::summary::{Replacement, RollingSummary};
use crate::collaborators::Summarizer;
use crate::errors::CallKind;
use crate::retry::{CallError, RetryPolicy, RetryRecord, call_with_retry};

/// What one compaction did.
#[derive(Debug)]
pub struct CompactionReport {
    pub replacement: Replacement,
    pub retries: Vec<RetryRecord>,
}

pub struct ContextCompactor {
    summarizer: Arc<dyn Summarizer>,
    policy: RetryPolicy,
}

impl ContextCompactor {
    pub fn new(summarizer: Arc<dyn Summarizer>, policy: RetryPolicy) -> Self {
        Self { summarizer, policy }
    }

    /// Fold `unit_text` into `summary`.
    ///
    /// On error the summary is left untouched.
    pub async fn compact(
        &self,
        summary: &mut RollingSummary,
        unit_text: &str,
        cancel: &CancellationToken,
    ) -> Result<CompactionReport, CallError> {
        let budget = summary.budget();
        let old = summary.text().to_string();
        let outcome = call_with_retry(&self.policy, CallKind::Summarize, cancel, || {
            self.summarizer.summarize(&old, unit_text, budget)
        })
        .await?;

        let replacement = summary.replace(&outcome.value);
        if replacement.truncated() {
            warn!(
                budget,
                dropped_chars = replacement.dropped_chars,
                "Summarizer exceeded context budget, keeping most recent text"
            );
        } else {
            debug!(chars = replacement.chars, budget, "Rolling summary replaced");
        }

        Ok(CompactionReport {
            replacement,
            retries: outcome.retries,
        })
    }
}

impl std::fmt::Debug for ContextCompactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCompactor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
