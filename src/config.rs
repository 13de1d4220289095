//! Configuration for quill.
//!
//! Settings are layered: `.quill/quill.toml` → environment (`QUILL_*`,
//! `.env` supported) → CLI flags. Every field has a default, so an empty or
//! missing file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! max_revisions = 2
//! quality_threshold = 0.7
//! context_budget = "2k"
//!
//! [retry]
//! retry_limit = 3
//! call_timeout_secs = 120
//! backoff_base_ms = 500
//! backoff_max_ms = 30000
//!
//! [backend]
//! command = "python3"
//! args = ["writer_backend.py"]
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! dir = ".quill/logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compaction::{ContextBudget, parse_context_budget};

/// Validated runtime settings for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Rewrites allowed per unit before the last draft is force-accepted.
    pub max_revisions: u32,
    /// Passed to the reviewer, which uses it to set `approved`.
    pub quality_threshold: f64,
    /// Size cap on the rolling summary.
    pub context_budget: ContextBudget,
    /// Transient-failure retries per collaborator call.
    pub retry_limit: u32,
    pub call_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            quality_threshold: default_quality_threshold(),
            context_budget: ContextBudget::default(),
            retry_limit: default_retry_limit(),
            call_timeout: Duration::from_secs(default_call_timeout_secs()),
            backoff_base: Duration::from_millis(default_backoff_base_ms()),
            backoff_max: Duration::from_millis(default_backoff_max_ms()),
        }
    }
}

impl PipelineConfig {
    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_context_budget(mut self, budget: ContextBudget) -> Self {
        self.context_budget = budget;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set both backoff bounds. Zero disables sleeping between retries.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            anyhow::bail!(
                "quality_threshold must be between 0 and 1, got {}",
                self.quality_threshold
            );
        }
        if self.context_budget.chars() == 0 {
            anyhow::bail!("context_budget cannot be zero");
        }
        if self.call_timeout.is_zero() {
            anyhow::bail!("call_timeout cannot be zero");
        }
        if self.backoff_base > self.backoff_max {
            anyhow::bail!(
                "backoff_base ({:?}) exceeds backoff_max ({:?})",
                self.backoff_base,
                self.backoff_max
            );
        }
        Ok(())
    }

    /// Apply `QUILL_*` overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QUILL_MAX_REVISIONS") {
            self.max_revisions = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid QUILL_MAX_REVISIONS: {}", v))?;
        }
        if let Some(v) = lookup("QUILL_QUALITY_THRESHOLD") {
            self.quality_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid QUILL_QUALITY_THRESHOLD: {}", v))?;
        }
        if let Some(v) = lookup("QUILL_CONTEXT_BUDGET") {
            self.context_budget = parse_context_budget(&v)?;
        }
        if let Some(v) = lookup("QUILL_RETRY_LIMIT") {
            self.retry_limit = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid QUILL_RETRY_LIMIT: {}", v))?;
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Character count, e.g. "2000" or "2k"
    #[serde(default = "default_context_budget")]
    pub context_budget: String,
}

fn default_max_revisions() -> u32 {
    2
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_context_budget() -> String {
    crate::compaction::DEFAULT_CONTEXT_BUDGET_CHARS.to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_revisions: default_max_revisions(),
            quality_threshold: default_quality_threshold(),
            context_budget: default_context_budget(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_retry_limit() -> u32 {
    3
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            call_timeout_secs: default_call_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// `[backend]` section: the external program serving collaborator calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for rotated log files. No file logging when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// Contents of `quill.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl QuillToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse quill.toml")
    }

    /// Load `quill.toml` from the given `.quill` directory, or defaults if absent.
    pub fn load_or_default(quill_dir: &Path) -> Result<Self> {
        let config_path = quill_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize quill.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Build the runtime pipeline configuration from the file layer only.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            max_revisions: self.pipeline.max_revisions,
            quality_threshold: self.pipeline.quality_threshold,
            context_budget: parse_context_budget(&self.pipeline.context_budget)?,
            retry_limit: self.retry.retry_limit,
            call_timeout: Duration::from_secs(self.retry.call_timeout_secs),
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            backoff_max: Duration::from_millis(self.retry.backoff_max_ms),
        };
        Ok(config)
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Err(e) = parse_context_budget(&self.pipeline.context_budget) {
            problems.push(format!(
                "Invalid context_budget '{}': {}",
                self.pipeline.context_budget, e
            ));
        }
        if !(0.0..=1.0).contains(&self.pipeline.quality_threshold) {
            problems.push(format!(
                "quality_threshold {} is outside [0, 1]",
                self.pipeline.quality_threshold
            ));
        }
        if self.retry.call_timeout_secs == 0 {
            problems.push("call_timeout_secs cannot be zero".to_string());
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            problems.push(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            ));
        }
        if let Err(e) = self.logging.level.parse::<tracing::Level>() {
            problems.push(format!("Invalid logging level '{}': {}", self.logging.level, e));
        }

        problems
    }
}

pub const CONFIG_DIR_NAME: &str = ".quill";
pub const CONFIG_FILE_NAME: &str = "quill.toml";

/// CLI-level overrides, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_revisions: Option<u32>,
    pub quality_threshold: Option<f64>,
    pub context_budget: Option<ContextBudget>,
    pub retry_limit: Option<u32>,
    pub backend_cmd: Option<String>,
}

/// Project configuration: the parsed file plus where it came from.
#[derive(Debug, Clone)]
pub struct QuillConfig {
    pub project_dir: PathBuf,
    pub quill_dir: PathBuf,
    pub toml: QuillToml,
    /// Why `.env` could not be loaded, if it exists but is unreadable or
    /// malformed. Logging is not set up yet at load time, so callers report it.
    pub env_file_error: Option<String>,
}

impl QuillConfig {
    /// Load configuration for a project directory. Also loads `.env` from
    /// the project directory if present.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let env_file_error = match dotenvy::from_path(project_dir.join(".env")) {
            Ok(()) => None,
            Err(e) if e.not_found() => None,
            Err(e) => Some(format!("Failed to load .env: {}", e)),
        };
        let quill_dir = project_dir.join(CONFIG_DIR_NAME);
        let toml = QuillToml::load_or_default(&quill_dir)?;
        Ok(Self {
            project_dir,
            quill_dir,
            toml,
            env_file_error,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.quill_dir.join(CONFIG_FILE_NAME)
    }

    pub fn has_config_file(&self) -> bool {
        self.config_path().exists()
    }

    /// Resolve the runtime configuration (file → env → CLI) and validate it.
    pub fn pipeline_config(&self, cli: &CliOverrides) -> Result<PipelineConfig> {
        let mut config = self.toml.to_pipeline_config()?;
        config.apply_env()?;
        if let Some(v) = cli.max_revisions {
            config.max_revisions = v;
        }
        if let Some(v) = cli.quality_threshold {
            config.quality_threshold = v;
        }
        if let Some(v) = cli.context_budget {
            config.context_budget = v;
        }
        if let Some(v) = cli.retry_limit {
            config.retry_limit = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Backend command line (CLI → env → file), if any. CLI and env values
    /// are split on whitespace into a program and its arguments.
    pub fn backend_command(&self, cli: &CliOverrides) -> Option<(String, Vec<String>)> {
        if let Some(cmd) = cli.backend_cmd.as_deref().and_then(split_command) {
            return Some(cmd);
        }
        if let Some(cmd) = std::env::var("QUILL_BACKEND_CMD")
            .ok()
            .as_deref()
            .and_then(split_command)
        {
            return Some(cmd);
        }
        self.toml
            .backend
            .command
            .clone()
            .map(|cmd| (cmd, self.toml.backend.args.clone()))
    }

    /// Log directory, resolved against the project directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_dir.join(dir)
            }
        })
    }
}

/// `"python3 backend.py --fast"` → `("python3", ["backend.py", "--fast"])`.
fn split_command(line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_revisions, 2);
        assert!((config.quality_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.retry_limit, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty() {
        let toml = QuillToml::parse("").unwrap();
        let config = toml.to_pipeline_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let toml = QuillToml::parse(
            r#"
[pipeline]
max_revisions = 4
context_budget = "1.5k"

[retry]
retry_limit = 1
backoff_base_ms = 0
backoff_max_ms = 0

[backend]
command = "python3"
args = ["backend.py", "--fast"]

[logging]
format = "json"
"#,
        )
        .unwrap();
        let config = toml.to_pipeline_config().unwrap();
        assert_eq!(config.max_revisions, 4);
        assert_eq!(config.context_budget.chars(), 1500);
        assert_eq!(config.retry_limit, 1);
        assert_eq!(config.backoff_max, Duration::ZERO);
        assert_eq!(toml.backend.args.len(), 2);
        assert_eq!(toml.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_reports_problems() {
        let toml = QuillToml::parse(
            r#"
[pipeline]
quality_threshold = 1.5
context_budget = "0"

[retry]
call_timeout_secs = 0

[logging]
level = "loud"
"#,
        )
        .unwrap();
        let problems = toml.validate();
        assert_eq!(problems.len(), 4);
        assert!(problems.iter().any(|p| p.contains("context_budget")));
        assert!(problems.iter().any(|p| p.contains("quality_threshold")));
    }

    #[test]
    fn test_validate_rejects_bad_runtime_values() {
        assert!(PipelineConfig::default()
            .with_quality_threshold(-0.1)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_call_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PipelineConfig::default()
            .with_backoff(Duration::from_secs(5), Duration::from_secs(1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QUILL_MAX_REVISIONS", "5"),
            ("QUILL_CONTEXT_BUDGET", "3k"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_revisions, 5);
        assert_eq!(config.context_budget.chars(), 3000);
        assert_eq!(config.retry_limit, 3);
    }

    #[test]
    fn test_env_override_invalid() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_with(|k| (k == "QUILL_RETRY_LIMIT").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("QUILL_RETRY_LIMIT"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let dir = tempdir().unwrap();
        let quill_dir = dir.path().join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&quill_dir).unwrap();
        std::fs::write(
            quill_dir.join(CONFIG_FILE_NAME),
            "[pipeline]\nmax_revisions = 4\n",
        )
        .unwrap();

        let config = QuillConfig::load(dir.path()).unwrap();
        assert!(config.has_config_file());
        let cli = CliOverrides {
            max_revisions: Some(1),
            ..Default::default()
        };
        let resolved = config.pipeline_config(&cli).unwrap();
        assert_eq!(resolved.max_revisions, 1);
    }

    #[test]
    fn test_backend_command_splits_program_and_args() {
        let dir = tempdir().unwrap();
        let config = QuillConfig::load(dir.path()).unwrap();
        let cli = CliOverrides {
            backend_cmd: Some("  python3 backend.py --fast ".to_string()),
            ..Default::default()
        };
        let (program, args) = config.backend_command(&cli).unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args, vec!["backend.py", "--fast"]);

        assert_eq!(split_command("bare"), Some(("bare".to_string(), Vec::new())));
        assert_eq!(split_command("   "), None);
    }

    #[test]
    fn test_missing_env_file_is_fine() {
        let dir = tempdir().unwrap();
        let config = QuillConfig::load(dir.path()).unwrap();
        assert!(config.env_file_error.is_none());
    }

    #[test]
    fn test_malformed_env_file_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "QUILL_TEST_UNCLOSED='no end\n").unwrap();
        let config = QuillConfig::load(dir.path()).unwrap();
        let error = config.env_file_error.unwrap();
        assert!(error.contains(".env"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut toml = QuillToml::default();
        toml.pipeline.max_revisions = 7;
        toml.save(&path).unwrap();
        let loaded = QuillToml::load(&path).unwrap();
        assert_eq!(loaded.pipeline.max_revisions, 7);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Pretty.to_string(), "pretty");
    }
}
