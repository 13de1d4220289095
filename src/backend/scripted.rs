//! Deterministic in-memory collaborators.
//!
//! Every answer is a pure function of the inputs plus the script: review
//! verdicts queued per unit, failures queued per call kind, and optional
//! latency. Unscripted reviews score 0.85 and approve when that meets the
//! configured threshold.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::collaborators::{
    DraftRequest, Generator, MetricsProvider, Outliner, Planner, ReviewContext, Reviewer,
    StoryPlan, Summarizer,
};
use crate::errors::{CallKind, CollaboratorError};
use crate::metrics::{AdvisoryMetrics, TextMetrics};
use crate::story::{
    ActOutline, CharacterProfile, CharacterRelationship, CharacterRole, CharacterRoster, Feedback,
    Location, Outline, StoryBrief, UnitId, UnitOutline, WorldContext, WorldRule,
};

const DEFAULT_SCORE: f64 = 0.85;

/// One call the backend received.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub call: CallKind,
    pub unit: Option<UnitId>,
    /// Revision number for drafts, revision count for reviews.
    pub revision: Option<u32>,
    /// Context handed to the generator, for drafts.
    pub prior_summary: Option<String>,
    /// Revision instructions handed to the generator, for rewrites.
    pub revision_feedback: Option<String>,
}

impl CallRecord {
    fn new(call: CallKind) -> Self {
        Self {
            call,
            unit: None,
            revision: None,
            prior_summary: None,
            revision_feedback: None,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    reviews: HashMap<UnitId, VecDeque<Feedback>>,
    failures: HashMap<CallKind, VecDeque<CollaboratorError>>,
    unit_failures: HashMap<(CallKind, UnitId), VecDeque<CollaboratorError>>,
    calls: Vec<CallRecord>,
}

#[derive(Debug)]
pub struct ScriptedBackend {
    acts: Vec<usize>,
    latency: HashMap<CallKind, Duration>,
    bounded_summaries: bool,
    script: Mutex<Script>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// One act of three units.
    pub fn new() -> Self {
        Self::with_acts(&[3])
    }

    /// `acts[i]` units in act `i + 1`.
    pub fn with_acts(acts: &[usize]) -> Self {
        Self {
            acts: acts.to_vec(),
            latency: HashMap::new(),
            bounded_summaries: true,
            script: Mutex::new(Script::default()),
        }
    }

    /// Queue review verdicts for a unit, consumed one per review.
    pub fn review_script(self, unit: UnitId, feedback: Vec<Feedback>) -> Self {
        self.lock()
            .reviews
            .entry(unit)
            .or_default()
            .extend(feedback);
        self
    }

    /// Fail the next calls of `call`, one error per call.
    pub fn fail(self, call: CallKind, errors: Vec<CollaboratorError>) -> Self {
        self.lock().failures.entry(call).or_default().extend(errors);
        self
    }

    /// Fail the next calls of `call` made for `unit`.
    pub fn fail_unit(self, call: CallKind, unit: UnitId, errors: Vec<CollaboratorError>) -> Self {
        self.lock()
            .unit_failures
            .entry((call, unit))
            .or_default()
            .extend(errors);
        self
    }

    /// Delay every `call` by `delay` before answering.
    pub fn with_latency(mut self, call: CallKind, delay: Duration) -> Self {
        self.latency.insert(call, delay);
        self
    }

    /// Let the summarizer ignore its budget and grow without bound.
    pub fn with_unbounded_summaries(mut self) -> Self {
        self.bounded_summaries = false;
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, call: CallKind) -> Vec<CallRecord> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.call == call)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply latency, log the call, and pop any queued failure.
    async fn enter(&self, record: CallRecord) -> Result<(), CollaboratorError> {
        if let Some(delay) = self.latency.get(&record.call) {
            tokio::time::sleep(*delay).await;
        }
        let mut script = self.lock();
        let call = record.call;
        let unit = record.unit;
        script.calls.push(record);
        if let Some(unit) = unit
            && let Some(err) = script
                .unit_failures
                .get_mut(&(call, unit))
                .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match script.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Split on sentence-ending punctuation followed by whitespace, so
/// "Scene 1.2" stays in one piece.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?')
            && text[i + 1..].chars().next().is_none_or(char::is_whitespace)
        {
            out.push(text[start..=i].trim());
            start = i + 1;
        }
    }
    out.push(text[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}

#[async_trait]
impl Planner for ScriptedBackend {
    async fn brief(&self, prompt: &str) -> Result<StoryBrief, CollaboratorError> {
        self.enter(CallRecord::new(CallKind::Brief)).await?;
        let title: Vec<&str> = prompt.split_whitespace().take(5).collect();
        let mut brief = StoryBrief::new(title.join(" "), prompt);
        brief.themes = vec!["memory".to_string(), "the sea".to_string()];
        brief.setting_summary = "A fishing town on a cold northern coast.".to_string();
        brief.scope.num_acts = self.acts.len() as u32;
        Ok(brief)
    }

    async fn roster(
        &self,
        _prompt: &str,
        _brief: &StoryBrief,
    ) -> Result<CharacterRoster, CollaboratorError> {
        self.enter(CallRecord::new(CallKind::Roster)).await?;
        let mut mara = CharacterProfile::new("mara", "Mara Quell", CharacterRole::Protagonist);
        mara.motivation = "Keep the light burning".to_string();
        let mut tobin = CharacterProfile::new("tobin", "Tobin Hale", CharacterRole::Mentor);
        tobin.voice_notes = "Short sentences, nautical slang".to_string();
        Ok(CharacterRoster {
            characters: vec![mara, tobin],
            relationships: vec![CharacterRelationship {
                from_character_id: "tobin".to_string(),
                to_character_id: "mara".to_string(),
                relationship_type: "mentor".to_string(),
                description: String::new(),
            }],
        })
    }

    async fn world(
        &self,
        _prompt: &str,
        _brief: &StoryBrief,
        _roster: &CharacterRoster,
    ) -> Result<WorldContext, CollaboratorError> {
        self.enter(CallRecord::new(CallKind::World)).await?;
        Ok(WorldContext {
            setting_period: "1890s".to_string(),
            setting_description: "Storm-bound headland and harbor town".to_string(),
            locations: vec![Location {
                location_id: "lighthouse".to_string(),
                name: "Greyhead Light".to_string(),
                description: String::new(),
                significance: "Where the story begins and ends".to_string(),
            }],
            rules: vec![WorldRule {
                rule_id: "tide".to_string(),
                category: "physical".to_string(),
                statement: "The causeway floods at high tide.".to_string(),
                implications: Vec::new(),
            }],
            key_facts: Vec::new(),
        })
    }
}

#[async_trait]
impl Outliner for ScriptedBackend {
    async fn outline(&self, plan: &StoryPlan) -> Result<Outline, CollaboratorError> {
        self.enter(CallRecord::new(CallKind::Outline)).await?;
        let pov = plan
            .roster
            .by_role(CharacterRole::Protagonist)
            .first()
            .map(|c| c.character_id.clone())
            .unwrap_or_default();
        let acts = self
            .acts
            .iter()
            .enumerate()
            .map(|(a, &count)| {
                let units = (1..=count)
                    .map(|p| {
                        let mut unit = UnitOutline::new(
                            format!("Scene {}.{}", a + 1, p),
                            format!("Move the story forward in scene {} of act {}", p, a + 1),
                        );
                        unit.setting = "lighthouse".to_string();
                        unit.pov_character = pov.clone();
                        unit.characters_present = vec![pov.clone()];
                        unit.target_word_count = 60;
                        unit
                    })
                    .collect();
                ActOutline::new(format!("Act {}", a + 1), units)
            })
            .collect();
        Ok(Outline::new(acts))
    }
}

#[async_trait]
impl Generator for ScriptedBackend {
    async fn draft(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError> {
        let revision = request.revision.map(|r| r.revision).unwrap_or(0);
        self.enter(CallRecord {
            call: CallKind::Draft,
            unit: Some(request.unit.id),
            revision: Some(revision),
            prior_summary: Some(request.prior_summary.to_string()),
            revision_feedback: request
                .revision
                .map(|r| r.feedback.revision_instructions.clone()),
        })
        .await?;
        let unit = request.unit;
        Ok(format!(
            "{} opens at the {} as revision {} begins. The keeper watches the water rise \
             against the causeway. Nobody answers the bell. By nightfall the lamp is lit \
             and the scene closes on unit {}.",
            unit.title, unit.setting, revision, unit.id
        ))
    }
}

#[async_trait]
impl Reviewer for ScriptedBackend {
    async fn review(
        &self,
        _draft: &str,
        _metrics: Option<&AdvisoryMetrics>,
        context: &ReviewContext<'_>,
    ) -> Result<Feedback, CollaboratorError> {
        let unit = context.unit.id;
        self.enter(CallRecord {
            call: CallKind::Review,
            unit: Some(unit),
            revision: Some(context.revision_count),
            ..CallRecord::new(CallKind::Review)
        })
        .await?;
        let scripted = self
            .lock()
            .reviews
            .get_mut(&unit)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| {
            if DEFAULT_SCORE >= context.quality_threshold {
                Feedback::approved(DEFAULT_SCORE)
            } else {
                Feedback::rejected(DEFAULT_SCORE, "Raise the stakes in the closing beat.")
            }
        }))
    }
}

#[async_trait]
impl Summarizer for ScriptedBackend {
    async fn summarize(
        &self,
        old_summary: &str,
        unit_text: &str,
        budget: usize,
    ) -> Result<String, CollaboratorError> {
        self.enter(CallRecord::new(CallKind::Summarize)).await?;
        let mut digest = sentences(old_summary);
        digest.extend(sentences(unit_text).first().copied());
        if self.bounded_summaries {
            // Drop the oldest sentences until the digest fits.
            while digest.len() > 1 && digest.join(" ").chars().count() > budget {
                digest.remove(0);
            }
        }
        Ok(digest.join(" "))
    }
}

#[async_trait]
impl MetricsProvider for ScriptedBackend {
    async fn metrics(
        &self,
        text: &str,
        unit: &UnitOutline,
    ) -> Result<AdvisoryMetrics, CollaboratorError> {
        self.enter(CallRecord {
            call: CallKind::Metrics,
            unit: Some(unit.id),
            ..CallRecord::new(CallKind::Metrics)
        })
        .await?;
        Ok(TextMetrics::analyze(text, unit.target_word_count))
    }
}
