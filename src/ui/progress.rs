use crate::pipeline::{PipelineState, RunStatus, Stage, TraceEvent};
use crate::ui::icons::{BOOK, CHECK, CLOCK, CROSS, PIVOT, SPARKLE, STOP};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Stage bar: spinner with the current stage and unit phase
/// - Unit bar: accepted units out of the outline total
///
/// The UI is driven entirely by published snapshots; see [`Self::render`].
pub struct PipelineUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    unit_bar: ProgressBar,
    verbose: bool,
    /// Trace events already printed.
    seen: AtomicUsize,
}

impl PipelineUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix(" Stage");
        stage_bar.enable_steady_tick(Duration::from_millis(100));

        let unit_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let unit_bar = multi.add(ProgressBar::new(0));
        unit_bar.set_style(unit_style);
        unit_bar.set_prefix(" Units");

        Self {
            multi,
            stage_bar,
            unit_bar,
            verbose,
            seen: AtomicUsize::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Bring the bars up to date with `state` and print trace events not
    /// shown yet.
    pub fn render(&self, state: &PipelineState) {
        let message = match (state.stage, state.current_unit()) {
            (Stage::UnitLoop, Some(unit)) => format!(
                "{} {} {} {}",
                style(state.stage).yellow(),
                style(unit.id).cyan(),
                unit.title,
                style(format!("({}, revision {})", unit.phase, unit.revision_count)).dim()
            ),
            (stage, _) => format!("{}", style(stage).yellow()),
        };
        self.stage_bar.set_message(message);

        self.unit_bar.set_length(state.units.len() as u64);
        self.unit_bar.set_position(state.accepted_units() as u64);
        self.unit_bar.set_message(state.title().to_string());

        // A resumed or restarted run may publish a shorter trace.
        let seen = self.seen.load(Ordering::SeqCst).min(state.trace.len());
        for event in &state.trace[seen..] {
            if let Some(line) = self.describe(event) {
                self.print_line(line);
            }
        }
        self.seen.store(state.trace.len(), Ordering::SeqCst);
    }

    fn describe(&self, event: &TraceEvent) -> Option<String> {
        match event {
            TraceEvent::OutlineReady { acts, units } => Some(format!(
                "{}Outline ready: {} acts, {} units",
                BOOK,
                style(acts).cyan(),
                style(units).cyan()
            )),
            TraceEvent::Accepted {
                unit,
                revision_count,
                reason,
            } => Some(format!(
                "  {}Unit {} accepted ({}, {} revisions)",
                CHECK,
                style(unit).green().bold(),
                reason,
                revision_count
            )),
            TraceEvent::RevisionRequested {
                unit,
                revision_count,
            } => Some(format!(
                "  {}Unit {} sent back for revision {}",
                PIVOT,
                style(unit).yellow(),
                revision_count
            )),
            TraceEvent::Retried {
                call,
                attempt,
                error,
                ..
            } => Some(format!(
                "  {}{} call failed ({}), retry {}",
                CLOCK,
                call,
                style(error).yellow(),
                attempt
            )),
            TraceEvent::ContractViolation { unit, detail } => Some(format!(
                "  {}Unit {}: {}",
                CROSS,
                style(unit).red().bold(),
                style(detail).red()
            )),
            TraceEvent::Resumed { stage, cursor } => Some(format!(
                "{}Resumed at {} (unit pointer {})",
                PIVOT,
                style(stage).yellow(),
                cursor
            )),
            TraceEvent::Reviewed {
                unit,
                revision,
                quality_score,
                approved,
            } if self.verbose => Some(format!(
                "    {} {} draft {} scored {:.2}{}",
                style("→").dim(),
                unit,
                revision,
                quality_score,
                if *approved { " (approved)" } else { "" }
            )),
            TraceEvent::SummaryReplaced {
                unit,
                chars,
                dropped_chars,
            } if self.verbose => Some(format!(
                "    {} summary after {}: {} chars{}",
                style("→").dim(),
                unit,
                chars,
                if *dropped_chars > 0 {
                    format!(", {} truncated", dropped_chars)
                } else {
                    String::new()
                }
            )),
            _ => None,
        }
    }

    /// Stop the spinner and print the outcome.
    pub fn finish(&self, status: RunStatus, state: &PipelineState) {
        self.render(state);
        self.stage_bar.finish_and_clear();
        match status {
            RunStatus::Finalized => {
                self.unit_bar.finish();
                self.print_line(format!(
                    "{}{} finalized with {} units",
                    SPARKLE,
                    style(state.title()).bold(),
                    style(state.manuscript.len()).green()
                ));
            }
            RunStatus::Failed => {
                self.unit_bar.abandon();
                let reason = state
                    .diagnostics
                    .as_ref()
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.print_line(format!(
                    "{}{} {}",
                    CROSS,
                    style("FAILED:").red().bold(),
                    reason
                ));
            }
            RunStatus::Cancelled => {
                self.unit_bar.abandon();
                self.print_line(format!(
                    "{}{} at unit pointer {}; resume from the checkpoint",
                    STOP,
                    style("Cancelled").yellow().bold(),
                    state.cursor
                ));
            }
        }
    }
}
