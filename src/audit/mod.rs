//! Append-only audit trail of orchestrator decisions.
//!
//! Every hook decision and operator action is written to
//! `.phaseloop/audit.jsonl` before the process returns, so a later process
//! (or a human) can reconstruct why the loop did what it did.

mod logger;

pub use logger::AuditLogger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditKind {
    SessionStarted {
        tier: String,
        ceiling: u32,
    },
    /// Worker kept running with the phase instruction
    Blocked,
    Transitioned {
        from: Phase,
        to: Phase,
        sentinel: String,
    },
    GatePassed,
    GateFailed {
        missing: Vec<String>,
        failing: Vec<String>,
    },
    /// Worker released; `reason` is the halt kind
    Halted {
        reason: String,
        message: String,
    },
    ForeignSession {
        host_session: String,
    },
    CeilingRaised {
        from: u32,
        to: u32,
    },
    MarkerPlaced {
        marker: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(flatten)]
    pub kind: AuditKind,
}

impl AuditEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: AuditKind) -> Self {
        Self {
            timestamp,
            session_id: None,
            phase: None,
            iteration: None,
            kind,
        }
    }

    /// Attach session position.
    pub fn at(mut self, session_id: &str, phase: Phase, iteration: u32) -> Self {
        self.session_id = Some(session_id.to_string());
        self.phase = Some(phase);
        self.iteration = Some(iteration);
        self
    }
}
