//! End-to-end pipeline behavior against the scripted backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quill::backend::ScriptedBackend;
use quill::collaborators::Collaborators;
use quill::compaction::ContextBudget;
use quill::errors::{CallKind, CheckpointError, CollaboratorError, PipelineError};
use quill::gates::{AcceptReason, GateDecision};
use quill::pipeline::{
    CheckpointStore, DiagnosticKind, Pipeline, PipelineState, RunOutcome, RunStatus, Stage,
    TraceEvent, UnitPhase,
};
use quill::story::{Feedback, UnitId};
use quill::PipelineConfig;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const PROMPT: &str = "A lighthouse keeper finds a message in a bottle";

fn config() -> PipelineConfig {
    PipelineConfig::default().with_backoff(Duration::ZERO, Duration::ZERO)
}

fn unit(position: u32) -> UnitId {
    UnitId::new(1, position)
}

fn pipeline(backend: &Arc<ScriptedBackend>, config: PipelineConfig) -> Pipeline {
    Pipeline::new(Collaborators::from_backend(backend.clone()), config)
}

async fn run_scripted(backend: ScriptedBackend, config: PipelineConfig) -> RunOutcome {
    let backend = Arc::new(backend);
    pipeline(&backend, config).run(PROMPT).await.unwrap()
}

fn retries_for(state: &PipelineState, id: UnitId, call: CallKind) -> usize {
    state
        .trace
        .iter()
        .filter(|e| matches!(e, TraceEvent::Retried { unit: Some(u), call: c, .. } if *u == id && *c == call))
        .count()
}

/// Every accepted unit was accepted on approval or at the cap, and never
/// before a rejected verdict below the cap.
fn assert_acceptance_rule(state: &PipelineState, max_revisions: u32) {
    let mut last_review: HashMap<UnitId, bool> = HashMap::new();
    for event in &state.trace {
        match event {
            TraceEvent::Reviewed { unit, approved, .. } => {
                last_review.insert(*unit, *approved);
            }
            TraceEvent::Decision {
                unit,
                revision_count,
                outcome,
            } => {
                assert!(*revision_count <= max_revisions);
                let approved = last_review[unit];
                let should_accept = approved || *revision_count == max_revisions;
                assert_eq!(outcome.is_accept(), should_accept, "decision for {}", unit);
            }
            TraceEvent::Accepted {
                unit,
                revision_count,
                reason,
            } => {
                let expected = if last_review[unit] {
                    AcceptReason::Approved
                } else {
                    AcceptReason::RevisionCap
                };
                assert_eq!(*reason, expected);
                assert!(*revision_count <= max_revisions);
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_all_units_approved_first_pass() {
    let outcome = run_scripted(ScriptedBackend::new(), config()).await;

    assert_eq!(outcome.status, RunStatus::Finalized);
    assert_eq!(outcome.state.stage, Stage::Finalized);
    assert_eq!(outcome.manuscript.len(), 3);
    assert!(outcome.diagnostics.is_none());
    assert!(outcome.error.is_none());
    for progress in &outcome.state.units {
        assert_eq!(progress.phase, UnitPhase::Accepted);
        assert_eq!(progress.revision_count, 0);
        assert_eq!(progress.accept_reason, Some(AcceptReason::Approved));
    }
    let order: Vec<UnitId> = outcome.manuscript.iter().map(|d| d.unit).collect();
    assert_eq!(order, vec![unit(1), unit(2), unit(3)]);
    assert_eq!(
        outcome.state.trace.last(),
        Some(&TraceEvent::Finalized { units: 3 })
    );
}

#[tokio::test]
async fn test_unit_approved_after_two_rejections() {
    let backend = ScriptedBackend::new().review_script(
        unit(2),
        vec![
            Feedback::rejected(0.5, "Tighten the opening"),
            Feedback::rejected(0.6, "The ending still drags"),
            Feedback::approved(0.8),
        ],
    );
    let backend = Arc::new(backend);
    let outcome = pipeline(&backend, config()).run(PROMPT).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Finalized);
    let progress = outcome.state.unit(unit(2)).unwrap();
    assert_eq!(progress.revision_count, 2);
    assert_eq!(progress.accept_reason, Some(AcceptReason::Approved));

    let accepted = outcome.manuscript.iter().find(|d| d.unit == unit(2)).unwrap();
    assert_eq!(accepted.revision, 2);

    // Each rewrite sees its own revision number and only the latest feedback.
    let drafts: Vec<_> = backend
        .calls_of(CallKind::Draft)
        .into_iter()
        .filter(|c| c.unit == Some(unit(2)))
        .collect();
    let revisions: Vec<Option<u32>> = drafts.iter().map(|c| c.revision).collect();
    assert_eq!(revisions, vec![Some(0), Some(1), Some(2)]);
    let instructions: Vec<Option<&str>> = drafts
        .iter()
        .map(|c| c.revision_feedback.as_deref())
        .collect();
    assert_eq!(
        instructions,
        vec![None, Some("Tighten the opening"), Some("The ending still drags")]
    );
    assert_acceptance_rule(&outcome.state, 2);
}

#[tokio::test]
async fn test_unit_force_accepted_at_revision_cap() {
    let backend = ScriptedBackend::new().review_script(
        unit(3),
        vec![
            Feedback::rejected(0.3, "Weak"),
            Feedback::rejected(0.4, "Still weak"),
            Feedback::rejected(0.45, "Not there"),
        ],
    );
    let outcome = run_scripted(backend, config().with_max_revisions(2)).await;

    assert_eq!(outcome.status, RunStatus::Finalized);
    let progress = outcome.state.unit(unit(3)).unwrap();
    assert_eq!(progress.revision_count, 2);
    assert_eq!(progress.accept_reason, Some(AcceptReason::RevisionCap));
    assert!(!progress.latest_feedback.as_ref().unwrap().approved);

    let decisions: Vec<(u32, GateDecision)> = outcome
        .state
        .trace
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Decision {
                unit: u,
                revision_count,
                outcome,
            } if *u == unit(3) => Some((*revision_count, *outcome)),
            _ => None,
        })
        .collect();
    assert_eq!(
        decisions,
        vec![
            (0, GateDecision::Retry),
            (1, GateDecision::Retry),
            (2, GateDecision::Accept(AcceptReason::RevisionCap)),
        ]
    );
    assert_acceptance_rule(&outcome.state, 2);
}

#[tokio::test]
async fn test_generator_timeouts_do_not_count_as_revisions() {
    let timeout = CollaboratorError::timeout(CallKind::Draft, Duration::from_secs(120));
    let backend = ScriptedBackend::new().fail_unit(
        CallKind::Draft,
        unit(1),
        vec![timeout.clone(), timeout],
    );
    let outcome = run_scripted(backend, config().with_retry_limit(3)).await;

    assert_eq!(outcome.status, RunStatus::Finalized);
    let progress = outcome.state.unit(unit(1)).unwrap();
    assert_eq!(progress.revision_count, 0);
    assert_eq!(progress.accept_reason, Some(AcceptReason::Approved));
    assert_eq!(retries_for(&outcome.state, unit(1), CallKind::Draft), 2);
}

#[tokio::test]
async fn test_out_of_range_score_is_contract_violation() {
    let backend = ScriptedBackend::new().review_script(unit(2), vec![Feedback::approved(1.4)]);
    let outcome = run_scripted(backend, config()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.state.stage, Stage::Failed);
    assert!(matches!(
        outcome.error,
        Some(PipelineError::ContractViolation { unit: u, .. }) if u == unit(2)
    ));

    let diagnostic = outcome.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::ContractViolation);
    assert_eq!(diagnostic.unit, Some(unit(2)));

    // Unit 1 survives; unit 2 is never accepted and unit 3 never starts.
    let accepted: Vec<UnitId> = outcome.manuscript.iter().map(|d| d.unit).collect();
    assert_eq!(accepted, vec![unit(1)]);
    assert!(!outcome.state.unit(unit(2)).unwrap().is_accepted());
    assert!(
        !outcome
            .state
            .trace
            .iter()
            .any(|e| matches!(e, TraceEvent::UnitStarted { unit: u } if *u == unit(3)))
    );
    assert!(outcome.render_manuscript().contains("unit 1.1"));
}

#[tokio::test]
async fn test_negative_score_is_not_clamped() {
    let backend = ScriptedBackend::new().review_script(unit(1), vec![Feedback::rejected(-0.2, "")]);
    let outcome = run_scripted(backend, config()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.manuscript.is_empty());
    // No review verdict was recorded for the violating feedback.
    assert!(
        !outcome
            .state
            .trace
            .iter()
            .any(|e| matches!(e, TraceEvent::Reviewed { .. }))
    );
}

#[tokio::test]
async fn test_revision_count_within_cap_in_every_snapshot() {
    let mut backend = ScriptedBackend::with_acts(&[2, 2]);
    for position in 1..=2 {
        for act in 1..=2 {
            backend = backend.review_script(
                UnitId::new(act, position),
                vec![Feedback::rejected(0.2, "no"); 4],
            );
        }
    }
    let backend = Arc::new(backend);
    let max_revisions = 1;
    let mut pipeline = pipeline(&backend, config().with_max_revisions(max_revisions));

    let mut reader = pipeline.subscribe();
    let watcher = tokio::spawn(async move {
        let mut observed = 0;
        let mut max_seen = 0;
        while reader.changed().await {
            if let Some(state) = reader.snapshot() {
                observed += 1;
                for unit in &state.units {
                    max_seen = max_seen.max(unit.revision_count);
                }
                if state.is_terminal() {
                    break;
                }
            }
        }
        (observed, max_seen)
    });

    let outcome = pipeline.run(PROMPT).await.unwrap();
    let (observed, max_seen) = watcher.await.unwrap();

    assert_eq!(outcome.status, RunStatus::Finalized);
    assert!(observed > 0);
    assert!(max_seen <= max_revisions);
    assert!(
        outcome
            .state
            .units
            .iter()
            .all(|u| u.accept_reason == Some(AcceptReason::RevisionCap))
    );
    assert_acceptance_rule(&outcome.state, max_revisions);
}

#[tokio::test]
async fn test_summary_stays_bounded_over_long_story() {
    let budget = ContextBudget::new(200).unwrap();
    let backend = ScriptedBackend::with_acts(&[20, 20, 15]).with_unbounded_summaries();
    let backend = Arc::new(backend);
    let outcome = pipeline(&backend, config().with_context_budget(budget))
        .run(PROMPT)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Finalized);
    assert_eq!(outcome.manuscript.len(), 55);
    assert!(outcome.state.summary.chars() <= 200);
    assert_eq!(outcome.state.summary.replacements(), 55);

    let mut truncated = false;
    for event in &outcome.state.trace {
        if let TraceEvent::SummaryReplaced {
            chars,
            dropped_chars,
            ..
        } = event
        {
            assert!(*chars <= 200);
            truncated |= *dropped_chars > 0;
        }
    }
    assert!(truncated, "an unbounded summarizer must have been cut down");

    // Generation context never exceeds the budget either.
    for call in backend.calls_of(CallKind::Draft) {
        let context = call.prior_summary.unwrap_or_default();
        assert!(context.chars().count() <= 200);
    }
}

#[tokio::test]
async fn test_next_unit_drafts_against_updated_summary() {
    let backend = Arc::new(ScriptedBackend::new());
    let outcome = pipeline(&backend, config()).run(PROMPT).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Finalized);

    let drafts = backend.calls_of(CallKind::Draft);
    assert_eq!(drafts[0].prior_summary.as_deref(), Some(""));
    let second = drafts[1].prior_summary.clone().unwrap();
    assert!(second.contains("Scene 1.1"));
    assert!(!second.contains("Scene 1.2"));
}

#[tokio::test]
async fn test_identical_inputs_produce_identical_traces() {
    async fn once() -> RunOutcome {
        let backend = ScriptedBackend::new()
            .review_script(
                unit(2),
                vec![Feedback::rejected(0.5, "again"), Feedback::approved(0.9)],
            )
            .fail(
                CallKind::Draft,
                vec![CollaboratorError::rate_limited(CallKind::Draft)],
            );
        let backend = Arc::new(backend);
        pipeline(&backend, config())
            .with_job_id("job-fixed")
            .run(PROMPT)
            .await
            .unwrap()
    }

    let first = once().await;
    let second = once().await;
    assert_eq!(first.status, RunStatus::Finalized);
    assert_eq!(first.state.trace, second.state.trace);
    assert_eq!(first.manuscript, second.manuscript);
    assert_eq!(first.render_manuscript(), second.render_manuscript());
    assert_eq!(first.state, second.state);
}

#[tokio::test]
async fn test_concurrent_jobs_are_independent() {
    let shared = Arc::new(ScriptedBackend::with_acts(&[2]));
    let mut a = pipeline(&shared, config());
    let mut b = pipeline(&shared, config().with_max_revisions(0));

    let (a, b) = tokio::join!(a.run("First story prompt"), b.run("Second story prompt"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.status, RunStatus::Finalized);
    assert_eq!(b.status, RunStatus::Finalized);
    assert_ne!(a.state.job_id, b.state.job_id);
    assert_eq!(a.state.title(), "First story prompt");
    assert_eq!(b.state.title(), "Second story prompt");
    assert_eq!(a.manuscript.len(), 2);
    assert_eq!(b.manuscript.len(), 2);
}

#[tokio::test]
async fn test_transient_failures_exhaust_retry_budget() {
    let timeout = CollaboratorError::timeout(CallKind::Draft, Duration::from_secs(1));
    let backend =
        ScriptedBackend::new().fail_unit(CallKind::Draft, unit(2), vec![timeout; 4]);
    let outcome = run_scripted(backend, config().with_retry_limit(3)).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    let diagnostic = outcome.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Abort);
    assert_eq!(diagnostic.stage, Stage::UnitLoop);
    assert_eq!(diagnostic.unit, Some(unit(2)));
    assert_eq!(diagnostic.call, Some(CallKind::Draft));
    assert_eq!(diagnostic.attempts, Some(4));
    assert_eq!(retries_for(&outcome.state, unit(2), CallKind::Draft), 3);
    assert_eq!(outcome.manuscript.len(), 1);
    // Timeouts never touched the revision counter.
    assert_eq!(outcome.state.unit(unit(2)).unwrap().revision_count, 0);
}

#[tokio::test]
async fn test_malformed_output_retried_once() {
    let malformed = CollaboratorError::malformed(CallKind::Review, "not json");
    let backend = ScriptedBackend::new().fail_unit(CallKind::Review, unit(1), vec![malformed.clone()]);
    let outcome = run_scripted(backend, config()).await;
    assert_eq!(outcome.status, RunStatus::Finalized);
    assert_eq!(retries_for(&outcome.state, unit(1), CallKind::Review), 1);

    let backend =
        ScriptedBackend::new().fail_unit(CallKind::Review, unit(1), vec![malformed.clone(), malformed]);
    let outcome = run_scripted(backend, config()).await;
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.diagnostics.unwrap().attempts, Some(2));
}

#[tokio::test]
async fn test_slow_collaborator_times_out() {
    let backend = ScriptedBackend::new().with_latency(CallKind::Brief, Duration::from_millis(200));
    let outcome = run_scripted(
        backend,
        config()
            .with_call_timeout(Duration::from_millis(20))
            .with_retry_limit(1),
    )
    .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    let diagnostic = outcome.diagnostics.unwrap();
    assert_eq!(diagnostic.stage, Stage::Planning);
    assert_eq!(diagnostic.call, Some(CallKind::Brief));
    assert!(matches!(
        outcome.error,
        Some(PipelineError::Abort {
            source: CollaboratorError::Timeout { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_empty_outline_aborts() {
    let backend = Arc::new(ScriptedBackend::with_acts(&[]));
    let outcome = pipeline(&backend, config()).run(PROMPT).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Failed);
    let diagnostic = outcome.diagnostics.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Abort);
    assert_eq!(diagnostic.stage, Stage::Outlining);
    // Malformed output gets one retry.
    assert_eq!(backend.calls_of(CallKind::Outline).len(), 2);
    assert!(outcome.state.brief.is_some());
    assert!(outcome.state.world.is_some());
}

#[tokio::test]
async fn test_metrics_failure_does_not_fail_run() {
    let backend = ScriptedBackend::new().fail(
        CallKind::Metrics,
        vec![CollaboratorError::malformed(CallKind::Metrics, "broken analyzer")],
    );
    let outcome = run_scripted(backend, config()).await;

    assert_eq!(outcome.status, RunStatus::Finalized);
    assert!(outcome.state.trace.iter().any(|e| matches!(
        e,
        TraceEvent::MetricsUnavailable { unit: u, .. } if *u == unit(1)
    )));
    assert_eq!(outcome.state.unit(unit(1)).unwrap().revision_count, 0);
}

#[tokio::test]
async fn test_summarization_failure_keeps_accepted_draft() {
    let malformed = CollaboratorError::malformed(CallKind::Summarize, "empty");
    let backend =
        ScriptedBackend::new().fail(CallKind::Summarize, vec![malformed.clone(), malformed]);
    let outcome = run_scripted(backend, config()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    let diagnostic = outcome.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostic.call, Some(CallKind::Summarize));
    assert_eq!(diagnostic.unit, Some(unit(1)));
    // The accepted draft is not lost.
    assert_eq!(outcome.manuscript.len(), 1);
    assert_eq!(outcome.manuscript[0].unit, unit(1));
    assert!(outcome.state.summary.is_empty());
}

#[tokio::test]
async fn test_empty_prompt_rejected() {
    let backend = Arc::new(ScriptedBackend::new());
    let err = pipeline(&backend, config()).run("   ").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let backend = Arc::new(ScriptedBackend::new());
    let err = pipeline(&backend, config().with_quality_threshold(1.5))
        .run(PROMPT)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}

#[tokio::test]
async fn test_cancel_before_start_then_resume() {
    let backend = Arc::new(ScriptedBackend::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut first = pipeline(&backend, config());
    let outcome = first.run_with_cancel(PROMPT, cancel).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.state.stage, Stage::Planning);
    assert!(matches!(outcome.error, Some(PipelineError::Cancelled)));
    assert!(outcome.diagnostics.is_none());

    let mut second = pipeline(&backend, config());
    let resumed = second.resume(outcome.state).await.unwrap();
    assert_eq!(resumed.status, RunStatus::Finalized);
    assert_eq!(resumed.manuscript.len(), 3);
}

#[tokio::test]
async fn test_cancel_mid_unit_discards_in_flight_work() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("job.json");
    let backend = Arc::new(
        ScriptedBackend::new()
            .review_script(unit(2), vec![Feedback::rejected(0.5, "again")])
            .with_latency(CallKind::Draft, Duration::from_millis(100)),
    );

    let cancel = CancellationToken::new();
    let mut first = pipeline(&backend, config()).with_checkpoint(CheckpointStore::create(&path));
    let mut reader = first.subscribe();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        while reader.changed().await {
            if reader.snapshot().is_some_and(|s| s.cursor >= 1) {
                trigger.cancel();
                break;
            }
        }
    });

    let outcome = first.run_with_cancel(PROMPT, cancel).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    let state = &outcome.state;
    assert!(state.cursor >= 1);
    assert_eq!(state.manuscript.len(), state.cursor);
    let in_flight = state.current_unit().unwrap();
    assert_eq!(in_flight.phase, UnitPhase::Pending);
    assert_eq!(in_flight.revision_count, 0);
    assert!(in_flight.latest_feedback.is_none());

    // The checkpoint on disk holds the cancelled state; resume finishes it.
    let (store, saved) = CheckpointStore::open(&path).unwrap();
    assert_eq!(saved.cursor, state.cursor);
    let mut second = pipeline(&backend, config()).with_checkpoint(store);
    let resumed = second.resume(saved).await.unwrap();

    assert_eq!(resumed.status, RunStatus::Finalized);
    let order: Vec<UnitId> = resumed.manuscript.iter().map(|d| d.unit).collect();
    assert_eq!(order, vec![unit(1), unit(2), unit(3)]);
    assert!(resumed.state.trace.iter().any(|e| matches!(e, TraceEvent::Cancelled { .. })));
    assert!(resumed.state.trace.iter().any(|e| matches!(e, TraceEvent::Resumed { .. })));

    let on_disk = CheckpointStore::load(&path).unwrap();
    assert_eq!(on_disk.stage, Stage::Finalized);
    assert_eq!(on_disk.version, resumed.state.version);
}

#[tokio::test]
async fn test_failed_state_is_not_resumable() {
    let backend = ScriptedBackend::new().review_script(unit(1), vec![Feedback::approved(1.4)]);
    let outcome = run_scripted(backend, config()).await;
    assert_eq!(outcome.status, RunStatus::Failed);

    let backend = Arc::new(ScriptedBackend::new());
    let err = pipeline(&backend, config())
        .resume(outcome.state)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NotResumable {
            stage: Stage::Failed
        }
    ));
}

#[tokio::test]
async fn test_finalized_checkpoint_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("job.json");
    let backend = Arc::new(ScriptedBackend::new());
    let outcome = pipeline(&backend, config())
        .with_checkpoint(CheckpointStore::create(&path))
        .run(PROMPT)
        .await
        .unwrap();

    let saved = CheckpointStore::load(&path).unwrap();
    assert!(saved.is_terminal());
    assert_eq!(saved.version, outcome.state.version);
    assert_eq!(saved.manuscript, outcome.manuscript);
    assert_eq!(saved.trace.len(), outcome.state.trace.len());
}

#[tokio::test]
async fn test_second_job_cannot_overwrite_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("job.json");
    let backend = Arc::new(ScriptedBackend::new());
    let mut pipeline =
        pipeline(&backend, config()).with_checkpoint(CheckpointStore::create(&path));

    let first = pipeline.run(PROMPT).await.unwrap();
    assert_eq!(first.status, RunStatus::Finalized);
    let calls_after_first = backend.calls().len();

    let err = pipeline.run("Another story entirely").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Checkpoint(CheckpointError::JobMismatch { ref owner, .. })
            if *owner == first.state.job_id
    ));
    assert_eq!(backend.calls().len(), calls_after_first);

    let on_disk = CheckpointStore::load(&path).unwrap();
    assert_eq!(on_disk.job_id, first.state.job_id);
    assert_eq!(on_disk.stage, Stage::Finalized);
    assert_eq!(on_disk.manuscript, first.manuscript);
}

#[tokio::test]
async fn test_resume_rejects_state_from_another_job() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("job.json");
    let backend = Arc::new(ScriptedBackend::new());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = pipeline(&backend, config())
        .with_job_id("job-a")
        .with_checkpoint(CheckpointStore::create(&path))
        .run_with_cancel(PROMPT, cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let other = pipeline(&backend, config())
        .with_job_id("job-b")
        .run_with_cancel(PROMPT, {
            let c = CancellationToken::new();
            c.cancel();
            c
        })
        .await
        .unwrap();

    let (store, _) = CheckpointStore::open(&path).unwrap();
    let err = pipeline(&backend, config())
        .with_checkpoint(store)
        .resume(other.state)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Checkpoint(CheckpointError::JobMismatch { .. })
    ));
    assert_eq!(CheckpointStore::load(&path).unwrap().job_id, "job-a");
}

#[tokio::test]
async fn test_snapshot_accessor_tracks_run() {
    let backend = Arc::new(ScriptedBackend::new());
    let mut pipeline = pipeline(&backend, config());
    assert!(pipeline.snapshot().is_none());

    let outcome = pipeline.run(PROMPT).await.unwrap();
    let snapshot = pipeline.snapshot().unwrap();
    assert_eq!(snapshot, outcome.state);
    assert_eq!(snapshot.stage, Stage::Finalized);
}

#[tokio::test]
async fn test_free_run_function() {
    let backend = Arc::new(ScriptedBackend::with_acts(&[1, 1]));
    let outcome = quill::run(PROMPT, config(), Collaborators::from_backend(backend))
        .await
        .unwrap();
    assert!(outcome.is_finalized());
    let order: Vec<UnitId> = outcome.manuscript.iter().map(|d| d.unit).collect();
    assert_eq!(order, vec![UnitId::new(1, 1), UnitId::new(2, 1)]);
}
