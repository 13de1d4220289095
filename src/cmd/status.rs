//! Checkpoint summary: `quill status`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use quill::pipeline::{CheckpointStore, Stage, UnitPhase};

pub fn cmd_status(checkpoint: &Path) -> Result<()> {
    let state = CheckpointStore::load(checkpoint)
        .with_context(|| format!("Failed to read checkpoint {}", checkpoint.display()))?;

    let stage = match state.stage {
        Stage::Finalized => style(state.stage).green(),
        Stage::Failed => style(state.stage).red(),
        _ => style(state.stage).yellow(),
    };

    println!();
    println!("{}", style(state.title()).bold());
    println!("  job:      {}", state.job_id);
    println!("  stage:    {}", stage);
    println!("  version:  {}", state.version);
    println!(
        "  units:    {}/{} accepted",
        state.accepted_units(),
        state.units.len()
    );
    println!(
        "  summary:  {}/{} chars",
        state.summary.chars(),
        state.summary.budget()
    );
    println!();

    for unit in &state.units {
        let marker = match unit.phase {
            UnitPhase::Accepted => style("✓").green(),
            UnitPhase::Pending => style("·").dim(),
            _ => style("▶").yellow(),
        };
        let reason = unit
            .accept_reason
            .map(|r| format!(", {}", r))
            .unwrap_or_default();
        println!(
            "  {} {:<5} {} {}",
            marker,
            unit.id.to_string(),
            unit.title,
            style(format!("({} revisions{})", unit.revision_count, reason)).dim()
        );
    }

    if let Some(diagnostic) = &state.diagnostics {
        println!();
        println!("{} {}", style("Diagnostic:").red().bold(), diagnostic.message);
    }

    println!();
    if state.is_terminal() {
        println!("Not resumable ({}).", state.stage);
    } else {
        println!(
            "Resumable: quill resume --checkpoint {}",
            checkpoint.display()
        );
    }
    Ok(())
}
