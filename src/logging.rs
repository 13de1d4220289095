//! Log subscriber setup for the `quill` binary.
//!
//! Logs always go to stderr so stdout stays clean for manuscripts and
//! reports. `QUILL_LOG` takes precedence over `--verbose` and the configured
//! level. With `[logging] dir` set, JSON lines are also written to a daily
//! rotated file.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LogFormat;

pub const LOG_ENV_VAR: &str = "QUILL_LOG";
pub const LOG_FILE_PREFIX: &str = "quill.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub verbose: bool,
    /// Default directive when `QUILL_LOG` is unset, e.g. "info".
    pub level: String,
    pub format: LogFormat,
    pub dir: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            level: "info".to_string(),
            format: LogFormat::Pretty,
            dir: None,
        }
    }
}

/// Directive used when `QUILL_LOG` is not set.
pub fn default_directive(verbose: bool, level: &str) -> String {
    if verbose {
        "debug".to_string()
    } else {
        level.to_string()
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process so buffered file logs are flushed.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let default = default_directive(options.verbose, &options.level);
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = match options.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&default))
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(env_filter(&default))
            .boxed(),
    };
    layers.push(console);

    let mut guard = None;
    if let Some(dir) = &options.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(&default))
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(guard)
}
