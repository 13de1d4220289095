//! Ordered record of everything a run did.
//!
//! Events carry no timestamps or durations, so two runs over the same
//! deterministic collaborators produce equal traces.

use serde::{Deserialize, Serialize};

use super::Stage;
use crate::errors::CallKind;
use crate::gates::{AcceptReason, GateDecision};
use crate::story::UnitId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    StageEntered {
        stage: Stage,
    },
    /// A planning artifact (brief, roster, or world) was obtained.
    PlanningArtifact {
        call: CallKind,
    },
    OutlineReady {
        acts: usize,
        units: usize,
    },
    UnitStarted {
        unit: UnitId,
    },
    Drafted {
        unit: UnitId,
        revision: u32,
        words: usize,
    },
    /// Advisory metrics could not be computed; review went ahead without them.
    MetricsUnavailable {
        unit: UnitId,
        error: String,
    },
    Reviewed {
        unit: UnitId,
        revision: u32,
        quality_score: f64,
        approved: bool,
    },
    Decision {
        unit: UnitId,
        revision_count: u32,
        outcome: GateDecision,
    },
    RevisionRequested {
        unit: UnitId,
        revision_count: u32,
    },
    /// A collaborator call failed transiently and was retried.
    Retried {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<UnitId>,
        call: CallKind,
        attempt: u32,
        error: String,
    },
    Accepted {
        unit: UnitId,
        revision_count: u32,
        reason: AcceptReason,
    },
    SummaryReplaced {
        unit: UnitId,
        chars: usize,
        dropped_chars: usize,
    },
    ContractViolation {
        unit: UnitId,
        detail: String,
    },
    Aborted {
        stage: Stage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<UnitId>,
        call: CallKind,
        attempts: u32,
        error: String,
    },
    Cancelled {
        stage: Stage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<UnitId>,
    },
    Resumed {
        stage: Stage,
        cursor: usize,
    },
    Finalized {
        units: usize,
    },
}

impl TraceEvent {
    /// Unit the event concerns, if any.
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            TraceEvent::UnitStarted { unit }
            | TraceEvent::Drafted { unit, .. }
            | TraceEvent::MetricsUnavailable { unit, .. }
            | TraceEvent::Reviewed { unit, .. }
            | TraceEvent::Decision { unit, .. }
            | TraceEvent::RevisionRequested { unit, .. }
            | TraceEvent::Accepted { unit, .. }
            | TraceEvent::SummaryReplaced { unit, .. }
            | TraceEvent::ContractViolation { unit, .. } => Some(*unit),
            TraceEvent::Retried { unit, .. }
            | TraceEvent::Aborted { unit, .. }
            | TraceEvent::Cancelled { unit, .. } => *unit,
            TraceEvent::StageEntered { .. }
            | TraceEvent::PlanningArtifact { .. }
            | TraceEvent::OutlineReady { .. }
            | TraceEvent::Resumed { .. }
            | TraceEvent::Finalized { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_event_round_trips() {
        let event = TraceEvent::Decision {
            unit: UnitId::new(1, 2),
            revision_count: 2,
            outcome: GateDecision::Accept(AcceptReason::RevisionCap),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "decision");
        assert_eq!(json["outcome"]["decision"], "accept");
        assert_eq!(json["outcome"]["reason"], "revision_cap");
        let back: TraceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_unit_accessor() {
        let id = UnitId::new(2, 1);
        assert_eq!(TraceEvent::UnitStarted { unit: id }.unit(), Some(id));
        assert_eq!(
            TraceEvent::StageEntered {
                stage: Stage::Planning
            }
            .unit(),
            None
        );
        assert_eq!(
            TraceEvent::Retried {
                unit: None,
                call: CallKind::Brief,
                attempt: 1,
                error: "timeout".to_string()
            }
            .unit(),
            None
        );
    }
}
