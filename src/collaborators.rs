//! Collaborator interfaces consumed by the pipeline.
//!
//! Each stage of the pipeline calls exactly one of these traits. They are
//! object-safe and `Send + Sync` so one backend can serve many concurrent
//! jobs. Implementations report failures as [`CollaboratorError`]; the
//! pipeline owns timeouts and retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::CollaboratorError;
use crate::metrics::AdvisoryMetrics;
use crate::story::{CharacterRoster, Feedback, Outline, StoryBrief, UnitOutline, WorldContext};

/// The three planning artifacts, complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPlan {
    pub brief: StoryBrief,
    pub roster: CharacterRoster,
    pub world: WorldContext,
}

/// The most recent review of a rejected draft, handed to the next attempt.
///
/// Only one is ever carried: older feedback is dropped to keep prompts bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionInstructions {
    /// Which revision the next draft will be (1 = first rewrite).
    pub revision: u32,
    pub feedback: Feedback,
}

/// Input to one generation call.
#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub unit: &'a UnitOutline,
    pub prior_summary: &'a str,
    pub revision: Option<&'a RevisionInstructions>,
    pub plan: &'a StoryPlan,
}

/// Context handed to the reviewer alongside the draft.
#[derive(Debug, Clone, Copy)]
pub struct ReviewContext<'a> {
    pub unit: &'a UnitOutline,
    pub plan: &'a StoryPlan,
    pub revision_count: u32,
    /// Score at or above which the reviewer should set `approved`.
    pub quality_threshold: f64,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn brief(&self, prompt: &str) -> Result<StoryBrief, CollaboratorError>;

    async fn roster(
        &self,
        prompt: &str,
        brief: &StoryBrief,
    ) -> Result<CharacterRoster, CollaboratorError>;

    async fn world(
        &self,
        prompt: &str,
        brief: &StoryBrief,
        roster: &CharacterRoster,
    ) -> Result<WorldContext, CollaboratorError>;
}

#[async_trait]
pub trait Outliner: Send + Sync {
    async fn outline(&self, plan: &StoryPlan) -> Result<Outline, CollaboratorError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn draft(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(
        &self,
        draft: &str,
        metrics: Option<&AdvisoryMetrics>,
        context: &ReviewContext<'_>,
    ) -> Result<Feedback, CollaboratorError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce the next rolling summary. `budget` is the size cap in
    /// characters; the pipeline enforces it regardless.
    async fn summarize(
        &self,
        old_summary: &str,
        unit_text: &str,
        budget: usize,
    ) -> Result<String, CollaboratorError>;
}

/// Advisory text metrics. Informational only.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn metrics(
        &self,
        text: &str,
        unit: &UnitOutline,
    ) -> Result<AdvisoryMetrics, CollaboratorError>;
}

/// The fixed set of collaborators one pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub outliner: Arc<dyn Outliner>,
    pub generator: Arc<dyn Generator>,
    pub reviewer: Arc<dyn Reviewer>,
    pub summarizer: Arc<dyn Summarizer>,
    pub metrics: Arc<dyn MetricsProvider>,
}

impl Collaborators {
    /// Use one backend for every role.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: Planner + Outliner + Generator + Reviewer + Summarizer + MetricsProvider + 'static,
    {
        Self {
            planner: backend.clone(),
            outliner: backend.clone(),
            generator: backend.clone(),
            reviewer: backend.clone(),
            summarizer: backend.clone(),
            metrics: backend,
        }
    }

    /// Replace the metrics provider.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsProvider>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
