//! Stage sequencer: `PLANNING → OUTLINING → UNIT_LOOP → FINALIZED`, `FAILED` from anywhere.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::controller::SceneController;
use super::state::{Diagnostic, DiagnosticKind, StateWriter, UnitProgress};
use super::trace::TraceEvent;
use super::{RunStatus, Stage, settle};
use crate::collaborators::{Collaborators, StoryPlan};
use crate::config::PipelineConfig;
use crate::errors::{CallKind, CollaboratorError, PipelineError};
use crate::retry::{RetryPolicy, call_with_retry};

pub(crate) struct StageSequencer<'a> {
    collaborators: &'a Collaborators,
    config: &'a PipelineConfig,
    policy: RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> StageSequencer<'a> {
    pub fn new(
        collaborators: &'a Collaborators,
        config: &'a PipelineConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            collaborators,
            config,
            policy: RetryPolicy::from_config(config),
            cancel,
        }
    }

    /// Advance from the state's current stage to `FINALIZED`.
    pub async fn drive(&self, writer: &mut StateWriter) -> Result<(), PipelineError> {
        if writer.state().stage == Stage::Planning {
            self.plan(writer).await?;
            self.enter(writer, Stage::Outlining);
        }

        let plan = writer.state().plan().ok_or_else(|| {
            PipelineError::InvalidInput("planning artifacts missing past PLANNING".to_string())
        })?;

        if writer.state().stage == Stage::Outlining {
            self.outline(writer, &plan).await?;
            self.enter(writer, Stage::UnitLoop);
            writer.checkpoint()?;
        }

        let controller = SceneController::new(self.collaborators, self.config, self.cancel);
        while writer.state().cursor < writer.state().units.len() {
            let index = writer.state().cursor;
            controller.process(writer, index, &plan).await?;
        }

        let units = writer.state().manuscript.len();
        self.enter(writer, Stage::Finalized);
        writer.record(TraceEvent::Finalized { units });
        writer.checkpoint()?;
        info!(units, "Pipeline finalized");
        Ok(())
    }

    fn enter(&self, writer: &mut StateWriter, stage: Stage) {
        writer.update(|s| s.stage = stage);
        writer.record(TraceEvent::StageEntered { stage });
        info!(%stage, "Entered stage");
    }

    /// Obtain whichever of brief, roster, and world are still missing.
    async fn plan(&self, writer: &mut StateWriter) -> Result<(), PipelineError> {
        let planner = &self.collaborators.planner;
        let prompt = writer.state().prompt.clone();
        let prompt = prompt.as_str();

        let brief = match writer.state().brief.clone() {
            Some(brief) => brief,
            None => {
                let result = call_with_retry(&self.policy, CallKind::Brief, self.cancel, move || async move {
                    let brief = planner.brief(prompt).await?;
                    match brief.schema_problem() {
                        Some(problem) => Err(CollaboratorError::malformed(CallKind::Brief, problem)),
                        None => Ok(brief),
                    }
                })
                .await;
                let brief = settle(writer, Stage::Planning, None, result)?;
                info!(title = %brief.title, "Story brief ready");
                writer.update(|s| s.brief = Some(brief.clone()));
                writer.record(TraceEvent::PlanningArtifact {
                    call: CallKind::Brief,
                });
                brief
            }
        };

        let roster = match writer.state().roster.clone() {
            Some(roster) => roster,
            None => {
                let brief = &brief;
                let result = call_with_retry(&self.policy, CallKind::Roster, self.cancel, move || {
                    planner.roster(prompt, brief)
                })
                .await;
                let roster = settle(writer, Stage::Planning, None, result)?;
                info!(characters = roster.characters.len(), "Character roster ready");
                writer.update(|s| s.roster = Some(roster.clone()));
                writer.record(TraceEvent::PlanningArtifact {
                    call: CallKind::Roster,
                });
                roster
            }
        };

        if writer.state().world.is_none() {
            let (brief, roster) = (&brief, &roster);
            let result = call_with_retry(&self.policy, CallKind::World, self.cancel, move || {
                planner.world(prompt, brief, roster)
            })
            .await;
            let world = settle(writer, Stage::Planning, None, result)?;
            info!(locations = world.locations.len(), "World context ready");
            writer.update(|s| s.world = Some(world));
            writer.record(TraceEvent::PlanningArtifact {
                call: CallKind::World,
            });
        }
        Ok(())
    }

    async fn outline(&self, writer: &mut StateWriter, plan: &StoryPlan) -> Result<(), PipelineError> {
        let outliner = &self.collaborators.outliner;
        let result = call_with_retry(&self.policy, CallKind::Outline, self.cancel, move || async move {
            let mut outline = outliner.outline(plan).await?;
            if outline.is_empty() {
                return Err(CollaboratorError::malformed(
                    CallKind::Outline,
                    "outline has no units",
                ));
            }
            // Positions come from structure, not from the outliner's numbering.
            outline.assign_ids();
            Ok(outline)
        })
        .await;
        let outline = settle(writer, Stage::Outlining, None, result)?;

        let acts = outline.acts.len();
        let units: Vec<UnitProgress> = outline
            .units()
            .map(|u| UnitProgress::new(u.id, u.title.clone()))
            .collect();
        let total = units.len();
        writer.update(|s| {
            s.outline = Some(outline);
            s.units = units;
            s.cursor = 0;
        });
        writer.record(TraceEvent::OutlineReady { acts, units: total });
        info!(acts, units = total, "Outline ready");
        Ok(())
    }

    /// Settle the state after `drive` returns and report how the run ended.
    pub fn conclude(
        &self,
        writer: &mut StateWriter,
        result: Result<(), PipelineError>,
    ) -> (RunStatus, Option<PipelineError>) {
        let err = match result {
            Ok(()) => return (RunStatus::Finalized, None),
            Err(err) => err,
        };
        let stage = writer.state().stage;

        if let PipelineError::Cancelled = err {
            let unit = writer.update(|s| s.roll_back_in_flight());
            writer.record(TraceEvent::Cancelled { stage, unit });
            warn!(%stage, unit = ?unit, "Pipeline cancelled, in-flight unit discarded");
            if let Err(e) = writer.checkpoint() {
                warn!(error = %e, "Failed to checkpoint cancelled run");
            }
            return (RunStatus::Cancelled, Some(err));
        }

        let diagnostic = diagnose(&err, stage);
        if let PipelineError::Abort {
            unit,
            attempts,
            source,
            ..
        } = &err
        {
            writer.record(TraceEvent::Aborted {
                stage,
                unit: *unit,
                call: source.call(),
                attempts: *attempts,
                error: source.kind().to_string(),
            });
        }
        error!(%stage, error = %err, "Pipeline failed");
        writer.update(|s| {
            s.stage = Stage::Failed;
            s.diagnostics = Some(diagnostic);
        });
        writer.record(TraceEvent::StageEntered {
            stage: Stage::Failed,
        });

        // A checkpoint error means the file is not ours to write any more.
        if !matches!(err, PipelineError::Checkpoint(_))
            && let Err(e) = writer.checkpoint()
        {
            warn!(error = %e, "Failed to checkpoint failed run");
        }
        (RunStatus::Failed, Some(err))
    }
}

fn diagnose(err: &PipelineError, stage: Stage) -> Diagnostic {
    let message = err.to_string();
    match err {
        PipelineError::ContractViolation { unit, .. } => Diagnostic {
            kind: DiagnosticKind::ContractViolation,
            stage,
            unit: Some(*unit),
            call: Some(CallKind::Review),
            attempts: None,
            message,
        },
        PipelineError::Abort {
            unit,
            attempts,
            source,
            ..
        } => Diagnostic {
            kind: DiagnosticKind::Abort,
            stage,
            unit: *unit,
            call: Some(source.call()),
            attempts: Some(*attempts),
            message,
        },
        PipelineError::Checkpoint(_) => Diagnostic {
            kind: DiagnosticKind::Checkpoint,
            stage,
            unit: None,
            call: None,
            attempts: None,
            message,
        },
        PipelineError::Cancelled
        | PipelineError::InvalidInput(_)
        | PipelineError::NotResumable { .. } => Diagnostic {
            kind: DiagnosticKind::InvalidState,
            stage,
            unit: None,
            call: None,
            attempts: None,
            message,
        },
    }
}
