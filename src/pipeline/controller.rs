//! Scene revision controller: `DRAFTING → REVIEWING → {REVISING → DRAFTING | ACCEPTED}`.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{StateWriter, UnitPhase};
use super::trace::TraceEvent;
use super::{Stage, escalate, non_empty, record_retries, settle};
use crate::collaborators::{
    Collaborators, DraftRequest, ReviewContext, RevisionInstructions, StoryPlan,
};
use crate::compaction::ContextCompactor;
use crate::config::PipelineConfig;
use crate::errors::{CallKind, PipelineError};
use crate::gates::{GateDecision, QualityGate};
use crate::metrics::AdvisoryMetrics;
use crate::retry::{CallError, RetryPolicy, call_with_retry};
use crate::story::{Draft, Feedback, UnitId, UnitOutline};

pub(crate) struct SceneController<'a> {
    collaborators: &'a Collaborators,
    gate: QualityGate,
    policy: RetryPolicy,
    /// Metrics are best effort: one attempt, no retries.
    metrics_policy: RetryPolicy,
    quality_threshold: f64,
    compactor: ContextCompactor,
    cancel: &'a CancellationToken,
}

impl<'a> SceneController<'a> {
    pub fn new(
        collaborators: &'a Collaborators,
        config: &PipelineConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        let policy = RetryPolicy::from_config(config);
        Self {
            collaborators,
            gate: QualityGate::new(config.max_revisions),
            policy,
            metrics_policy: RetryPolicy {
                retry_limit: 0,
                ..policy
            },
            quality_threshold: config.quality_threshold,
            compactor: ContextCompactor::new(collaborators.summarizer.clone(), policy),
            cancel,
        }
    }

    /// Take the unit at `index` from its first draft to acceptance, compact
    /// the rolling summary, and advance the cursor.
    pub async fn process(
        &self,
        writer: &mut StateWriter,
        index: usize,
        plan: &StoryPlan,
    ) -> Result<(), PipelineError> {
        let prior = writer.state().summary.text().to_string();
        let unit = writer
            .update(|s| {
                let outline = s.outline.as_mut()?;
                outline.set_prior_summary(index, &prior);
                let unit = outline.unit(index).cloned()?;
                let progress = s.units.get_mut(index)?;
                progress.reset();
                progress.phase = UnitPhase::Drafting;
                Some(unit)
            })
            .ok_or_else(|| PipelineError::InvalidInput(format!("no unit at index {}", index)))?;
        let id = unit.id;
        writer.record(TraceEvent::UnitStarted { unit: id });
        info!(unit = %id, title = %unit.title, "Starting unit");

        let mut revision_count = 0u32;
        let mut instructions: Option<RevisionInstructions> = None;
        loop {
            writer.set_unit_phase(index, UnitPhase::Drafting);
            let text = self
                .draft(writer, &unit, plan, instructions.as_ref())
                .await?;
            let draft = Draft::new(id, text, revision_count);
            writer.record(TraceEvent::Drafted {
                unit: id,
                revision: revision_count,
                words: draft.word_count,
            });
            debug!(unit = %id, revision = revision_count, words = draft.word_count, "Draft received");

            writer.set_unit_phase(index, UnitPhase::Reviewing);
            let metrics = self.metrics(writer, &unit, &draft.text).await?;
            let feedback = self
                .review(writer, &unit, plan, &draft.text, metrics.as_ref(), revision_count)
                .await?;

            if let Some(detail) = feedback.contract_problem() {
                error!(unit = %id, %detail, "Reviewer broke the feedback contract");
                writer.record(TraceEvent::ContractViolation {
                    unit: id,
                    detail: detail.clone(),
                });
                return Err(PipelineError::ContractViolation { unit: id, detail });
            }
            writer.record(TraceEvent::Reviewed {
                unit: id,
                revision: revision_count,
                quality_score: feedback.quality_score,
                approved: feedback.approved,
            });

            let decision = self.gate.check(&feedback, revision_count);
            writer.record(TraceEvent::Decision {
                unit: id,
                revision_count,
                outcome: decision,
            });

            match decision {
                GateDecision::Accept(reason) => {
                    writer.update(|s| {
                        if let Some(progress) = s.units.get_mut(index) {
                            progress.phase = UnitPhase::Accepted;
                            progress.revision_count = revision_count;
                            progress.accept_reason = Some(reason);
                            progress.latest_feedback = Some(feedback);
                        }
                        s.manuscript.push(draft.clone());
                    });
                    writer.record(TraceEvent::Accepted {
                        unit: id,
                        revision_count,
                        reason,
                    });
                    info!(unit = %id, revision_count, %reason, "Unit accepted");

                    self.compact(writer, id, &draft.text).await?;
                    writer.update(|s| s.cursor = index + 1);
                    writer.checkpoint()?;
                    return Ok(());
                }
                GateDecision::Retry => {
                    revision_count += 1;
                    let latest = feedback.clone();
                    writer.update(|s| {
                        if let Some(progress) = s.units.get_mut(index) {
                            progress.phase = UnitPhase::Revising;
                            progress.revision_count = revision_count;
                            progress.latest_feedback = Some(latest);
                        }
                    });
                    writer.record(TraceEvent::RevisionRequested {
                        unit: id,
                        revision_count,
                    });
                    info!(
                        unit = %id,
                        revision_count,
                        score = feedback.quality_score,
                        "Draft rejected, revising"
                    );
                    // Older feedback is dropped here.
                    instructions = Some(RevisionInstructions {
                        revision: revision_count,
                        feedback,
                    });
                }
            }
        }
    }

    async fn draft(
        &self,
        writer: &mut StateWriter,
        unit: &UnitOutline,
        plan: &StoryPlan,
        instructions: Option<&RevisionInstructions>,
    ) -> Result<String, PipelineError> {
        let request = DraftRequest {
            unit,
            prior_summary: &unit.prior_summary,
            revision: instructions,
            plan,
        };
        let request = &request;
        let generator = &self.collaborators.generator;
        let result = call_with_retry(&self.policy, CallKind::Draft, self.cancel, move || async move {
            non_empty(generator.draft(request).await?, CallKind::Draft)
        })
        .await;
        settle(writer, Stage::UnitLoop, Some(unit.id), result)
    }

    /// Advisory metrics, or `None` if the provider failed. Never fails the
    /// unit except on cancellation.
    async fn metrics(
        &self,
        writer: &mut StateWriter,
        unit: &UnitOutline,
        text: &str,
    ) -> Result<Option<AdvisoryMetrics>, PipelineError> {
        let provider = &self.collaborators.metrics;
        let result = call_with_retry(&self.metrics_policy, CallKind::Metrics, self.cancel, move || {
            provider.metrics(text, unit)
        })
        .await;
        match result {
            Ok(outcome) => Ok(Some(outcome.value)),
            Err(CallError::Cancelled { .. }) => Err(PipelineError::Cancelled),
            Err(CallError::Exhausted { error, .. }) => {
                warn!(unit = %unit.id, error = %error, "Advisory metrics unavailable");
                writer.record(TraceEvent::MetricsUnavailable {
                    unit: unit.id,
                    error: error.kind().to_string(),
                });
                Ok(None)
            }
        }
    }

    async fn review(
        &self,
        writer: &mut StateWriter,
        unit: &UnitOutline,
        plan: &StoryPlan,
        text: &str,
        metrics: Option<&AdvisoryMetrics>,
        revision_count: u32,
    ) -> Result<Feedback, PipelineError> {
        let context = ReviewContext {
            unit,
            plan,
            revision_count,
            quality_threshold: self.quality_threshold,
        };
        let context = &context;
        let reviewer = &self.collaborators.reviewer;
        let result = call_with_retry(&self.policy, CallKind::Review, self.cancel, move || {
            reviewer.review(text, metrics, context)
        })
        .await;
        settle(writer, Stage::UnitLoop, Some(unit.id), result)
    }

    async fn compact(
        &self,
        writer: &mut StateWriter,
        id: UnitId,
        text: &str,
    ) -> Result<(), PipelineError> {
        let mut summary = writer.state().summary.clone();
        match self.compactor.compact(&mut summary, text, self.cancel).await {
            Ok(report) => {
                record_retries(writer, Some(id), &report.retries);
                writer.update(|s| s.summary = summary);
                writer.record(TraceEvent::SummaryReplaced {
                    unit: id,
                    chars: report.replacement.chars,
                    dropped_chars: report.replacement.dropped_chars,
                });
                Ok(())
            }
            Err(err) => Err(escalate(writer, Stage::UnitLoop, Some(id), err)),
        }
    }
}
