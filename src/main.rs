use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quill::compaction::{ContextBudget, parse_context_budget};
use quill::config::{CliOverrides, LogFormat, QuillConfig};
use quill::logging::{self, LogOptions};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "quill")]
#[command(version, about = "Staged story generation with bounded revision loops")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format on stderr: pretty or json. Overrides quill.toml.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Backend selection, output location and pipeline overrides shared by
/// `run` and `resume`.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Use the built-in deterministic backend (dry run)
    #[arg(long, conflicts_with = "backend_cmd")]
    pub scripted: bool,

    /// External backend program. Overrides QUILL_BACKEND_CMD and quill.toml.
    #[arg(long)]
    pub backend_cmd: Option<String>,

    /// Directory for manuscript.md and report.json
    #[arg(long, default_value = "quill-out")]
    pub out: PathBuf,

    #[arg(long)]
    pub max_revisions: Option<u32>,

    #[arg(long)]
    pub quality_threshold: Option<f64>,

    /// Rolling summary size, e.g. "2000", "2k" or "2000 chars"
    #[arg(long, value_parser = parse_context_budget)]
    pub context_budget: Option<ContextBudget>,

    #[arg(long)]
    pub retry_limit: Option<u32>,
}

impl PipelineArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            max_revisions: self.max_revisions,
            quality_threshold: self.quality_threshold,
            context_budget: self.context_budget,
            retry_limit: self.retry_limit,
            backend_cmd: self.backend_cmd.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a story from a prompt
    Run {
        /// The story prompt
        #[arg(short, long)]
        prompt: String,

        /// Persist pipeline state here so the run can be resumed
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Continue an interrupted run from its checkpoint
    Resume {
        #[arg(long)]
        checkpoint: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Summarize a checkpoint
    Status {
        #[arg(long)]
        checkpoint: PathBuf,
    },
    /// View and manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default quill.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = QuillConfig::load(&project_dir)?;

    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        level: config.toml.logging.level.clone(),
        format: cli.log_format.unwrap_or(config.toml.logging.format),
        dir: config.log_dir(),
    })?;
    if let Some(error) = &config.env_file_error {
        tracing::warn!("{}", error);
    }

    let code = match &cli.command {
        Commands::Run {
            prompt,
            checkpoint,
            pipeline,
        } => cmd::cmd_run(&cli, &config, prompt, checkpoint.as_deref(), pipeline).await?,
        Commands::Resume {
            checkpoint,
            pipeline,
        } => cmd::cmd_resume(&cli, &config, checkpoint, pipeline).await?,
        Commands::Status { checkpoint } => {
            cmd::cmd_status(checkpoint)?;
            ExitCode::SUCCESS
        }
        Commands::Config { command } => {
            cmd::cmd_config(&config, command.clone())?;
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}
