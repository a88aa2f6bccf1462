use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::SessionError;
use crate::phase::Phase;

/// Declared task complexity. Selects the iteration ceiling at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trivial,
    #[default]
    Standard,
    Complex,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trivial => "trivial",
            Tier::Standard => "standard",
            Tier::Complex => "complex",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trivial" => Ok(Tier::Trivial),
            "standard" => Ok(Tier::Standard),
            "complex" => Ok(Tier::Complex),
            other => Err(SessionError::UnknownTier(other.to_string())),
        }
    }
}

/// How a session left the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Verification gate passed on entry to COMPLETE.
    Completed,
    /// Operator forced completion with a justification.
    ForceCompleted,
    /// Abort marker or `cancel` command.
    Cancelled,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::ForceCompleted => "force-completed",
            SessionOutcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One end-to-end run of the phase loop for a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub phase: Phase,
    /// Invocations evaluated so far; incremented on every blocking return
    pub iteration: u32,
    pub ceiling: u32,
    pub tier: Tier,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub task: String,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_script: Option<PathBuf>,
    #[serde(default)]
    pub skip_challenge: bool,
    /// Transcript length at the last transition; earlier entries are ignored
    #[serde(default)]
    pub transcript_offset: u64,
    /// Host session bound on the first hook invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_complete_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
}

impl Session {
    pub fn new(
        task: impl Into<String>,
        tier: Tier,
        ceiling: u32,
        skip_challenge: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: Phase::initial(skip_challenge),
            iteration: 0,
            ceiling,
            tier,
            started_at: now,
            last_activity: now,
            task: task.into(),
            complete: false,
            publish_script: None,
            skip_challenge,
            transcript_offset: 0,
            host_session_id: None,
            force_complete_reason: None,
            outcome: None,
        }
    }

    /// Move to `phase`, keeping `complete` consistent with it.
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.complete = phase.is_terminal();
    }

    pub fn ceiling_reached(&self) -> bool {
        self.iteration >= self.ceiling
    }

    /// Structural checks applied when a record is loaded from disk.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.complete && self.phase != Phase::Complete {
            return Err(format!(
                "complete is true but phase is {}",
                self.phase
            ));
        }
        if self.id.is_empty() {
            return Err("session id is empty".to_string());
        }
        Ok(())
    }

    /// Raise the ceiling. Lowering it at or below the current iteration is refused.
    pub fn raise_ceiling(&mut self, ceiling: u32) -> Result<(), SessionError> {
        if ceiling <= self.iteration {
            return Err(SessionError::CeilingTooLow {
                requested: ceiling,
                iteration: self.iteration,
            });
        }
        self.ceiling = ceiling;
        Ok(())
    }
}
