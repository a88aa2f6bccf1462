//! One-invocation evaluation engine.
//!
//! Each host invocation reads the session, runs the safety valves, looks for
//! the current phase's sentinel, applies any transition (running the
//! verification gate on entry to COMPLETE), persists, and answers block or
//! allow.

mod checklist;
mod engine;

pub use checklist::{IssuesFile, Progress, parse_progress, read_progress};
pub use engine::{Orchestrator, StartRequest};
