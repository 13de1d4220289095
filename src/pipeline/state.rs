//! Pipeline State: the single mutable aggregate of one job.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::checkpoint::CheckpointStore;
use super::trace::TraceEvent;
use super::Stage;
use crate::collaborators::StoryPlan;
use crate::compaction::{ContextBudget, RollingSummary};
use crate::errors::{CallKind, CheckpointError};
use crate::gates::AcceptReason;
use crate::story::{CharacterRoster, Draft, Feedback, Outline, StoryBrief, UnitId, WorldContext};

/// Sub-state of one unit inside the revision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitPhase {
    #[default]
    Pending,
    Drafting,
    Reviewing,
    Revising,
    Accepted,
}

impl std::fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitPhase::Pending => "PENDING",
            UnitPhase::Drafting => "DRAFTING",
            UnitPhase::Reviewing => "REVIEWING",
            UnitPhase::Revising => "REVISING",
            UnitPhase::Accepted => "ACCEPTED",
        };
        write!(f, "{}", s)
    }
}

/// Progress of one planned unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub id: UnitId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub phase: UnitPhase,
    #[serde(default)]
    pub revision_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_reason: Option<AcceptReason>,
    /// Only the most recent review is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_feedback: Option<Feedback>,
}

impl UnitProgress {
    pub fn new(id: UnitId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            phase: UnitPhase::Pending,
            revision_count: 0,
            accept_reason: None,
            latest_feedback: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.phase == UnitPhase::Accepted
    }

    /// Discard in-flight work on this unit.
    pub fn reset(&mut self) {
        self.phase = UnitPhase::Pending;
        self.revision_count = 0;
        self.accept_reason = None;
        self.latest_feedback = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ContractViolation,
    Abort,
    Checkpoint,
    /// The state itself was inconsistent, e.g. a hand-edited checkpoint.
    InvalidState,
}

/// Why a run ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<CallKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub job_id: String,
    /// Bumped on every mutation.
    pub version: u64,
    pub prompt: String,
    pub stage: Stage,
    #[serde(default)]
    pub brief: Option<StoryBrief>,
    #[serde(default)]
    pub roster: Option<CharacterRoster>,
    #[serde(default)]
    pub world: Option<WorldContext>,
    #[serde(default)]
    pub outline: Option<Outline>,
    /// Index, in outline order, of the next unit to process.
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub units: Vec<UnitProgress>,
    pub summary: RollingSummary,
    /// Accepted drafts, in outline order.
    #[serde(default)]
    pub manuscript: Vec<Draft>,
    #[serde(default)]
    pub diagnostics: Option<Diagnostic>,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
}

impl PipelineState {
    pub fn new(job_id: impl Into<String>, prompt: impl Into<String>, budget: ContextBudget) -> Self {
        Self {
            job_id: job_id.into(),
            version: 0,
            prompt: prompt.into(),
            stage: Stage::Planning,
            brief: None,
            roster: None,
            world: None,
            outline: None,
            cursor: 0,
            units: Vec::new(),
            summary: RollingSummary::new(budget),
            manuscript: Vec::new(),
            diagnostics: None,
            trace: Vec::new(),
        }
    }

    /// All three planning artifacts, once obtained.
    pub fn plan(&self) -> Option<StoryPlan> {
        Some(StoryPlan {
            brief: self.brief.clone()?,
            roster: self.roster.clone()?,
            world: self.world.clone()?,
        })
    }

    pub fn title(&self) -> &str {
        self.brief
            .as_ref()
            .map(|b| b.title.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or("Untitled")
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitProgress> {
        self.units.iter().find(|u| u.id == id)
    }

    /// The unit the cursor points at, if the loop is not done.
    pub fn current_unit(&self) -> Option<&UnitProgress> {
        self.units.get(self.cursor)
    }

    pub fn accepted_units(&self) -> usize {
        self.units.iter().filter(|u| u.is_accepted()).count()
    }

    /// Render the accepted drafts as a markdown manuscript.
    pub fn render_manuscript(&self) -> String {
        crate::story::render_manuscript(self.title(), self.outline.as_ref(), &self.manuscript)
    }

    /// Check the structural invariants. Returns a description of the
    /// first one violated.
    pub fn check_invariants(&self, max_revisions: u32) -> Result<(), String> {
        if let Some(u) = self.units.iter().find(|u| u.revision_count > max_revisions) {
            return Err(format!(
                "unit {} has revision_count {} above cap {}",
                u.id, u.revision_count, max_revisions
            ));
        }
        if !self.summary.within_budget() {
            return Err(format!(
                "rolling summary holds {} chars, budget {}",
                self.summary.chars(),
                self.summary.budget()
            ));
        }
        if self.cursor > self.units.len() {
            return Err(format!(
                "cursor {} past {} units",
                self.cursor,
                self.units.len()
            ));
        }
        // Units before the cursor are accepted, in order, each with one draft.
        for (i, unit) in self.units.iter().enumerate().take(self.cursor) {
            if !unit.is_accepted() {
                return Err(format!("unit {} before cursor is not accepted", unit.id));
            }
            if self.manuscript.get(i).map(|d| d.unit) != Some(unit.id) {
                return Err(format!("manuscript entry {} does not match unit {}", i, unit.id));
            }
        }
        if self.manuscript.len() > self.cursor + 1 {
            return Err(format!(
                "{} drafts for cursor {}",
                self.manuscript.len(),
                self.cursor
            ));
        }
        Ok(())
    }

    /// Drop any work on the unit at the cursor so processing restarts from
    /// the last fully accepted unit.
    pub(crate) fn roll_back_in_flight(&mut self) -> Option<UnitId> {
        self.manuscript.truncate(self.cursor);
        let unit = self.units.get_mut(self.cursor)?;
        unit.reset();
        Some(unit.id)
    }
}

/// Single writer for one job's state.
///
/// Every mutation bumps `version` and publishes a snapshot to subscribers.
pub(crate) struct StateWriter {
    state: PipelineState,
    snapshots: Arc<watch::Sender<Option<PipelineState>>>,
    store: Option<CheckpointStore>,
}

impl StateWriter {
    pub fn new(
        state: PipelineState,
        snapshots: Arc<watch::Sender<Option<PipelineState>>>,
        store: Option<CheckpointStore>,
    ) -> Self {
        snapshots.send_replace(Some(state.clone()));
        Self {
            state,
            snapshots,
            store,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn update<R>(&mut self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        let result = f(&mut self.state);
        self.state.version += 1;
        self.snapshots.send_replace(Some(self.state.clone()));
        result
    }

    pub fn record(&mut self, event: TraceEvent) {
        self.update(|s| s.trace.push(event));
    }

    pub fn set_unit_phase(&mut self, index: usize, phase: UnitPhase) {
        self.update(|s| {
            if let Some(unit) = s.units.get_mut(index) {
                unit.phase = phase;
            }
        });
    }

    /// Persist the current state if a checkpoint store is attached.
    pub fn checkpoint(&mut self) -> Result<(), CheckpointError> {
        if let Some(store) = self.store.as_mut() {
            store.save(&self.state)?;
            debug!(version = self.state.version, "Checkpoint saved");
        }
        Ok(())
    }

    pub fn into_parts(self) -> (PipelineState, Option<CheckpointStore>) {
        (self.state, self.store)
    }
}
