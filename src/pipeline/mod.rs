//! Story pipeline orchestration.
//!
//! A [`Pipeline`] drives one job through
//! `PLANNING → OUTLINING → UNIT_LOOP → FINALIZED`, with `FAILED` reachable
//! from any stage. Units are processed strictly in outline order, each by
//! the scene revision controller, and the rolling summary is compacted once
//! per accepted unit.
//!
//! ## Usage
//!
//! ```ignore
//! let mut pipeline = Pipeline::new(collaborators, PipelineConfig::default());
//! let reader = pipeline.subscribe();
//! let outcome = pipeline.run("A lighthouse keeper finds a message in a bottle").await?;
//! println!("{}", outcome.render_manuscript());
//! ```
//!
//! One `Pipeline` serves one job at a time (`run` takes `&mut self`).
//! Independent jobs run concurrently on separate `Pipeline` values that
//! share the same collaborators.

mod checkpoint;
mod controller;
mod sequencer;
mod state;
mod trace;

pub use checkpoint::CheckpointStore;
pub use state::{Diagnostic, DiagnosticKind, PipelineState, UnitPhase, UnitProgress};
pub use trace::TraceEvent;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::PipelineConfig;
use crate::errors::{CallKind, CheckpointError, CollaboratorError, PipelineError};
use crate::retry::{CallError, CallOutcome, RetryRecord};
use crate::story::{Draft, UnitId};
use sequencer::StageSequencer;
use state::StateWriter;

/// Top-level stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Planning,
    Outlining,
    UnitLoop,
    Finalized,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Finalized | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Planning => "PLANNING",
            Stage::Outlining => "OUTLINING",
            Stage::UnitLoop => "UNIT_LOOP",
            Stage::Finalized => "FINALIZED",
            Stage::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Finalized,
    Failed,
    /// Stopped by the caller; the state is resumable.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Finalized => write!(f, "FINALIZED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Result of `run`/`resume`.
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Accepted drafts. Partial when the run failed or was cancelled.
    pub manuscript: Vec<Draft>,
    pub diagnostics: Option<Diagnostic>,
    /// The error that ended the run, if it did not finalize.
    pub error: Option<PipelineError>,
    /// Final Pipeline State, suitable for checkpointing or `resume`.
    pub state: PipelineState,
}

impl RunOutcome {
    pub fn is_finalized(&self) -> bool {
        self.status == RunStatus::Finalized
    }

    pub fn render_manuscript(&self) -> String {
        self.state.render_manuscript()
    }
}

/// Read-only view of a running pipeline's state.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Option<PipelineState>>,
}

impl SnapshotReader {
    /// Latest published state, or `None` before the first run starts.
    pub fn snapshot(&self) -> Option<PipelineState> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published state. Returns `false` once the pipeline
    /// has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

pub struct Pipeline {
    collaborators: Collaborators,
    config: PipelineConfig,
    store: Option<CheckpointStore>,
    job_id: Option<String>,
    snapshots: Arc<watch::Sender<Option<PipelineState>>>,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            collaborators,
            config,
            store: None,
            job_id: None,
            snapshots: Arc::new(tx),
        }
    }

    /// Persist state to `store` after every accepted unit and at the end.
    pub fn with_checkpoint(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a fixed job id instead of a random one.
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.snapshots.subscribe(),
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Option<PipelineState> {
        self.snapshots.borrow().clone()
    }

    pub async fn run(&mut self, prompt: &str) -> Result<RunOutcome, PipelineError> {
        self.run_with_cancel(prompt, CancellationToken::new()).await
    }

    /// Run a new job. `Err` only when the job cannot start; failures during
    /// the run are reported through [`RunOutcome`].
    pub async fn run_with_cancel(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::InvalidInput(
                "story prompt is empty".to_string(),
            ));
        }
        self.validate_config()?;

        let job_id = self
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        // A new job never reuses a checkpoint another job has written.
        self.check_store_owner(&job_id, true)?;
        let state = PipelineState::new(job_id, prompt, self.config.context_budget);
        let mut writer = StateWriter::new(state, self.snapshots.clone(), self.store.take());
        writer.record(TraceEvent::StageEntered {
            stage: Stage::Planning,
        });
        info!(job_id = %writer.state().job_id, "Starting pipeline run");

        Ok(self.execute(writer, cancel).await)
    }

    pub async fn resume(&mut self, state: PipelineState) -> Result<RunOutcome, PipelineError> {
        self.resume_with_cancel(state, CancellationToken::new()).await
    }

    /// Continue a non-terminal state from its unit pointer. Work on the
    /// unit in flight when the state was captured is discarded.
    pub async fn resume_with_cancel(
        &mut self,
        mut state: PipelineState,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        if state.is_terminal() {
            return Err(PipelineError::NotResumable { stage: state.stage });
        }
        self.validate_config()?;
        self.check_store_owner(&state.job_id, false)?;

        if let Some(outline) = &state.outline
            && outline.total_units() != state.units.len()
        {
            return Err(PipelineError::InvalidInput(format!(
                "state tracks {} units but the outline has {}",
                state.units.len(),
                outline.total_units()
            )));
        }

        let rebudget = state.summary.set_budget(self.config.context_budget);
        if rebudget.truncated() {
            warn!(
                dropped_chars = rebudget.dropped_chars,
                "Rolling summary truncated to the configured budget"
            );
        }
        state.roll_back_in_flight();
        state
            .check_invariants(self.config.max_revisions)
            .map_err(PipelineError::InvalidInput)?;

        let stage = state.stage;
        let cursor = state.cursor;
        let mut writer = StateWriter::new(state, self.snapshots.clone(), self.store.take());
        writer.record(TraceEvent::Resumed { stage, cursor });
        info!(job_id = %writer.state().job_id, %stage, cursor, "Resuming pipeline run");

        Ok(self.execute(writer, cancel).await)
    }

    /// Refuse a checkpoint store bound to a different job. With `fresh`,
    /// any bound store is refused since the job has not written yet.
    fn check_store_owner(&self, job_id: &str, fresh: bool) -> Result<(), PipelineError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        match store.job_id() {
            Some(owner) if fresh || owner != job_id => {
                Err(PipelineError::Checkpoint(CheckpointError::JobMismatch {
                    path: store.path().to_path_buf(),
                    owner: owner.to_string(),
                    job_id: job_id.to_string(),
                }))
            }
            _ => Ok(()),
        }
    }

    fn validate_config(&self) -> Result<(), PipelineError> {
        self.config
            .validate()
            .map_err(|e| PipelineError::InvalidInput(format!("{:#}", e)))
    }

    async fn execute(&mut self, mut writer: StateWriter, cancel: CancellationToken) -> RunOutcome {
        let span = info_span!("job", job_id = %writer.state().job_id);
        let sequencer = StageSequencer::new(&self.collaborators, &self.config, &cancel);
        let (status, error) = async {
            let result = sequencer.drive(&mut writer).await;
            sequencer.conclude(&mut writer, result)
        }
        .instrument(span)
        .await;

        let (state, store) = writer.into_parts();
        self.store = store;
        RunOutcome {
            status,
            manuscript: state.manuscript.clone(),
            diagnostics: state.diagnostics.clone(),
            error,
            state,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// Run one job to completion with a fresh pipeline.
pub async fn run(
    prompt: &str,
    config: PipelineConfig,
    collaborators: Collaborators,
) -> Result<RunOutcome, PipelineError> {
    Pipeline::new(collaborators, config).run(prompt).await
}

fn record_retries(writer: &mut StateWriter, unit: Option<UnitId>, retries: &[RetryRecord]) {
    for retry in retries {
        writer.record(TraceEvent::Retried {
            unit,
            call: retry.error.call(),
            attempt: retry.attempt,
            error: retry.error.kind().to_string(),
        });
    }
}

/// Record the retries of a finished call and turn failure into a
/// pipeline error.
fn settle<T>(
    writer: &mut StateWriter,
    stage: Stage,
    unit: Option<UnitId>,
    result: Result<CallOutcome<T>, CallError>,
) -> Result<T, PipelineError> {
    match result {
        Ok(outcome) => {
            record_retries(writer, unit, &outcome.retries);
            Ok(outcome.value)
        }
        Err(err) => Err(escalate(writer, stage, unit, err)),
    }
}

fn escalate(
    writer: &mut StateWriter,
    stage: Stage,
    unit: Option<UnitId>,
    err: CallError,
) -> PipelineError {
    record_retries(writer, unit, err.retries());
    match err {
        CallError::Exhausted {
            error, attempts, ..
        } => PipelineError::Abort {
            stage,
            unit,
            attempts,
            source: error,
        },
        CallError::Cancelled { .. } => PipelineError::Cancelled,
    }
}

/// Reject empty text as malformed output so the retry policy handles it.
fn non_empty(text: String, call: CallKind) -> Result<String, CollaboratorError> {
    if text.trim().is_empty() {
        Err(CollaboratorError::malformed(call, "empty text"))
    } else {
        Ok(text)
    }
}
