//! Typed error hierarchy for the phaseloop orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `SessionError`: session record loading, storing, and operator commands
//! - `QueueError`: claim coordination over the shared backlog
//! - `PublishError`: version control and CI collaborators

use thiserror::Error;

/// Errors from the session store and phase machine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown phase '{0}'. Valid phases: CHALLENGE, PLAN, BUILD, REVIEW, FIX, SHIP, COMPLETE")]
    UnknownPhase(String),

    #[error("Unknown complexity tier '{0}'. Valid tiers: trivial, standard, complex")]
    UnknownTier(String),

    #[error("A session is already active ({id}); cancel or complete it first")]
    AlreadyActive { id: String },

    #[error("No active session")]
    NoActiveSession,

    #[error("Session record at {path} is corrupt: {message}")]
    Corrupt {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("New ceiling {requested} must be greater than the current iteration {iteration}")]
    CeilingTooLow { requested: u32, iteration: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the task queue and claim coordinator.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Work item {id} not found in backlog")]
    ItemNotFound { id: String },

    #[error("Work item {id} is not claimed by {worker}")]
    ClaimNotHeld { id: String, worker: String },

    #[error("Work item {id} has no conflict record")]
    NoConflict { id: String },

    #[error("Work item {id} has no escalation record")]
    NoEscalation { id: String },

    #[error("Failed to acquire queue lock at {path}: {source}")]
    LockFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the publish pipeline's external collaborators.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Failed to spawn git: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("CI status query failed: {0}")]
    CiQuery(String),

    #[error("Cannot determine repository owner/name from remote URL '{0}'")]
    UnknownRemote(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
