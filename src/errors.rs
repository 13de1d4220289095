//! Typed error hierarchy for the quill pipeline.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `CollaboratorError`: a single generation/review/summarization call failed
//! - `PipelineError`: the run cannot continue (contract violation, abort, cancellation)
//! - `CheckpointError`: persisting or loading pipeline state failed

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::Stage;
use crate::story::UnitId;

/// Which collaborator call failed. Used in errors, retries, and trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Brief,
    Roster,
    World,
    Outline,
    Draft,
    Review,
    Summarize,
    Metrics,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallKind::Brief => "brief",
            CallKind::Roster => "roster",
            CallKind::World => "world",
            CallKind::Outline => "outline",
            CallKind::Draft => "draft",
            CallKind::Review => "review",
            CallKind::Summarize => "summarize",
            CallKind::Metrics => "metrics",
        };
        write!(f, "{}", s)
    }
}

/// Errors returned by a collaborator call.
///
/// Every variant may be retried. Timeouts and rate limits are transient and
/// can use the call's whole retry budget; malformed output gets at most one
/// retry from that budget before the pipeline aborts.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("{call} call timed out after {after:?}")]
    Timeout { call: CallKind, after: Duration },

    #[error("{call} call was rate limited")]
    RateLimited {
        call: CallKind,
        retry_after: Option<Duration>,
    },

    #[error("{call} call returned malformed output: {detail}")]
    MalformedOutput { call: CallKind, detail: String },
}

impl CollaboratorError {
    pub fn timeout(call: CallKind, after: Duration) -> Self {
        Self::Timeout { call, after }
    }

    pub fn rate_limited(call: CallKind) -> Self {
        Self::RateLimited {
            call,
            retry_after: None,
        }
    }

    pub fn malformed(call: CallKind, detail: impl Into<String>) -> Self {
        Self::MalformedOutput {
            call,
            detail: detail.into(),
        }
    }

    /// The call that produced this error.
    pub fn call(&self) -> CallKind {
        match self {
            Self::Timeout { call, .. }
            | Self::RateLimited { call, .. }
            | Self::MalformedOutput { call, .. } => *call,
        }
    }

    /// Timeouts and rate limits get the full retry budget; malformed
    /// output gets a single retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RateLimited { .. })
    }

    /// Short machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedOutput { .. } => "malformed_output",
        }
    }
}

/// Errors that stop a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A collaborator returned data outside its declared schema. Never clamped.
    #[error("Contract violation in unit {unit}: {detail}")]
    ContractViolation { unit: UnitId, detail: String },

    /// Retry budget exhausted for a collaborator call.
    #[error("Pipeline aborted during {stage} after {attempts} attempt(s): {source}")]
    Abort {
        stage: Stage,
        unit: Option<UnitId>,
        attempts: u32,
        #[source]
        source: CollaboratorError,
    },

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pipeline state in stage {stage} cannot be resumed")]
    NotResumable { stage: Stage },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint version conflict: expected {expected:?} on disk, found {found}")]
    StaleVersion { expected: Option<u64>, found: u64 },

    #[error("Checkpoint at {path} belongs to job {owner}, not {job_id}")]
    JobMismatch {
        path: std::path::PathBuf,
        owner: String,
        job_id: String,
    },

    #[error("Checkpoint I/O at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is not valid JSON: {source}")]
    Serde {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
