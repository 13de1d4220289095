//! Story generation: `quill run` and `quill resume`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quill::backend::{CommandBackend, ScriptedBackend};
use quill::collaborators::Collaborators;
use quill::config::QuillConfig;
use quill::gates::AcceptReason;
use quill::pipeline::{
    CheckpointStore, Diagnostic, Pipeline, PipelineState, RunOutcome, RunStatus, Stage,
    TraceEvent, UnitPhase,
};
use quill::story::UnitId;
use quill::ui::PipelineUI;

use super::super::{Cli, PipelineArgs};

pub const MANUSCRIPT_FILE: &str = "manuscript.md";
pub const REPORT_FILE: &str = "report.json";

/// Exit code for a run that ended `FAILED`.
const EXIT_FAILED: u8 = 2;
/// Exit code for a run stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

pub async fn cmd_run(
    cli: &Cli,
    config: &QuillConfig,
    prompt: &str,
    checkpoint: Option<&Path>,
    args: &PipelineArgs,
) -> Result<ExitCode> {
    let mut pipeline = build_pipeline(config, args)?;
    if let Some(path) = checkpoint {
        if path.exists() {
            anyhow::bail!(
                "Checkpoint {} already exists. Use 'quill resume --checkpoint {}' to continue it.",
                path.display(),
                path.display()
            );
        }
        pipeline = pipeline.with_checkpoint(CheckpointStore::create(path));
    }

    let cancel = cancel_on_ctrl_c();
    let ui = Arc::new(PipelineUI::new(cli.verbose));
    let progress = spawn_progress(&pipeline, ui.clone());
    let result = pipeline.run_with_cancel(prompt, cancel).await;
    progress.abort();

    let outcome = result.context("Pipeline could not start")?;
    finish(&ui, &outcome, &args.out)
}

pub async fn cmd_resume(
    cli: &Cli,
    config: &QuillConfig,
    checkpoint: &Path,
    args: &PipelineArgs,
) -> Result<ExitCode> {
    let (store, state) = CheckpointStore::open(checkpoint)
        .with_context(|| format!("Failed to open checkpoint {}", checkpoint.display()))?;
    info!(
        job_id = %state.job_id,
        stage = %state.stage,
        cursor = state.cursor,
        "Loaded checkpoint"
    );

    let mut pipeline = build_pipeline(config, args)?.with_checkpoint(store);
    let cancel = cancel_on_ctrl_c();
    let ui = Arc::new(PipelineUI::new(cli.verbose));
    let progress = spawn_progress(&pipeline, ui.clone());
    let result = pipeline.resume_with_cancel(state, cancel).await;
    progress.abort();

    let outcome = result.context("Checkpoint cannot be resumed")?;
    finish(&ui, &outcome, &args.out)
}

fn build_pipeline(config: &QuillConfig, args: &PipelineArgs) -> Result<Pipeline> {
    let overrides = args.overrides();
    let pipeline_config = config.pipeline_config(&overrides)?;
    let collaborators = build_collaborators(config, args)?;
    Ok(Pipeline::new(collaborators, pipeline_config))
}

fn build_collaborators(config: &QuillConfig, args: &PipelineArgs) -> Result<Collaborators> {
    if args.scripted {
        info!("Using scripted backend");
        return Ok(Collaborators::from_backend(Arc::new(ScriptedBackend::new())));
    }
    match config.backend_command(&args.overrides()) {
        Some((program, backend_args)) => {
            info!(%program, "Using command backend");
            let backend = CommandBackend::new(program)
                .with_args(backend_args)
                .with_working_dir(&config.project_dir);
            Ok(Collaborators::from_backend(Arc::new(backend)))
        }
        None => anyhow::bail!(
            "No backend configured. Pass --scripted or --backend-cmd <program>, \
             set QUILL_BACKEND_CMD, or set [backend] command in .quill/quill.toml."
        ),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling after the current call");
            token.cancel();
        }
    });
    cancel
}

fn spawn_progress(pipeline: &Pipeline, ui: Arc<PipelineUI>) -> tokio::task::JoinHandle<()> {
    let mut reader = pipeline.subscribe();
    tokio::spawn(async move {
        while reader.changed().await {
            if let Some(state) = reader.snapshot() {
                ui.render(&state);
            }
        }
    })
}

fn finish(ui: &PipelineUI, outcome: &RunOutcome, out: &Path) -> Result<ExitCode> {
    ui.finish(outcome.status, &outcome.state);
    write_outputs(outcome, out)?;
    println!("Manuscript: {}", out.join(MANUSCRIPT_FILE).display());
    println!("Report:     {}", out.join(REPORT_FILE).display());

    Ok(match outcome.status {
        RunStatus::Finalized => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::from(EXIT_FAILED),
        RunStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
    })
}

#[derive(Debug, Serialize)]
struct UnitReport {
    id: UnitId,
    title: String,
    phase: UnitPhase,
    revision_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    accept_reason: Option<AcceptReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality_score: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    job_id: &'a str,
    title: &'a str,
    status: RunStatus,
    stage: Stage,
    finished_at: DateTime<Utc>,
    units: Vec<UnitReport>,
    words: usize,
    diagnostics: Option<&'a Diagnostic>,
    trace: &'a [TraceEvent],
}

impl<'a> RunReport<'a> {
    fn new(status: RunStatus, state: &'a PipelineState) -> Self {
        let units = state
            .units
            .iter()
            .map(|u| UnitReport {
                id: u.id,
                title: u.title.clone(),
                phase: u.phase,
                revision_count: u.revision_count,
                accept_reason: u.accept_reason,
                quality_score: u.latest_feedback.as_ref().map(|f| f.quality_score),
            })
            .collect();
        Self {
            job_id: &state.job_id,
            title: state.title(),
            status,
            stage: state.stage,
            finished_at: Utc::now(),
            units,
            words: state.manuscript.iter().map(|d| d.word_count).sum(),
            diagnostics: state.diagnostics.as_ref(),
            trace: &state.trace,
        }
    }
}

/// Write `manuscript.md` and `report.json` into `out`. Partial manuscripts
/// from failed or cancelled runs are written too.
pub fn write_outputs(outcome: &RunOutcome, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create output directory {}", out.display()))?;

    let manuscript_path = out.join(MANUSCRIPT_FILE);
    std::fs::write(&manuscript_path, outcome.render_manuscript())
        .with_context(|| format!("Failed to write {}", manuscript_path.display()))?;

    let report = RunReport::new(outcome.status, &outcome.state);
    let report_path = out.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    Ok(())
}
