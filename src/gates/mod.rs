//! Quality gate for the per-unit revision loop.
//!
//! The gate is a pure function of the reviewer's boolean verdict and the
//! unit's revision counter. Scores and advisory metrics never reach it, so
//! the revision cap works the same whatever scoring scheme a reviewer uses.
//!
//! ```
//! use quill::gates::{AcceptReason, GateDecision, decide};
//! use quill::story::Feedback;
//!
//! let rejected = Feedback::rejected(0.4, "Slow the pacing.");
//! assert_eq!(decide(&rejected, 0, 2), GateDecision::Retry);
//! assert_eq!(decide(&rejected, 2, 2), GateDecision::Accept(AcceptReason::RevisionCap));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::story::Feedback;

/// Why a unit was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptReason {
    /// The reviewer approved the draft.
    Approved,
    /// The revision cap was reached; the last draft is kept as is.
    RevisionCap,
}

impl fmt::Display for AcceptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptReason::Approved => write!(f, "approved"),
            AcceptReason::RevisionCap => write!(f, "revision cap"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum GateDecision {
    Accept(AcceptReason),
    Retry,
}

impl GateDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateDecision::Accept(_))
    }
}

/// Accept iff the reviewer approved or the cap is reached; otherwise retry.
///
/// Approval takes precedence, so a unit approved on its final allowed
/// attempt is recorded as approved rather than capped.
pub fn decide(feedback: &Feedback, revision_count: u32, max_revisions: u32) -> GateDecision {
    if feedback.approved {
        GateDecision::Accept(AcceptReason::Approved)
    } else if revision_count >= max_revisions {
        GateDecision::Accept(AcceptReason::RevisionCap)
    } else {
        GateDecision::Retry
    }
}

/// The gate bound to a configured revision cap.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub max_revisions: u32,
}

impl QualityGate {
    pub fn new(max_revisions: u32) -> Self {
        Self { max_revisions }
    }

    pub fn check(&self, feedback: &Feedback, revision_count: u32) -> GateDecision {
        decide(feedback, revision_count, self.max_revisions)
    }
}
