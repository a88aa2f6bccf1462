//! Safety valves: the unconditional halts that bound the loop.
//!
//! Checked before anything else on every invocation, in this order:
//!
//! 1. operator markers (`ABORT`, `FORCE_COMPLETE`, `HANDOFF`), consumed on read
//! 2. staleness (`now - last_activity` over the configured hours)
//! 3. iteration ceiling (`iteration >= ceiling`)
//!
//! Any halt lets the worker exit. None of them depend on phase semantics.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::session::Session;

pub const ABORT_MARKER: &str = "ABORT";
pub const FORCE_COMPLETE_MARKER: &str = "FORCE_COMPLETE";
pub const HANDOFF_MARKER: &str = "HANDOFF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Abort,
    /// Carries the operator's justification
    ForceComplete(String),
    Handoff,
}

impl Marker {
    /// File name of the marker.
    pub fn name(&self) -> &'static str {
        match self {
            Marker::Abort => ABORT_MARKER,
            Marker::ForceComplete(_) => FORCE_COMPLETE_MARKER,
            Marker::Handoff => HANDOFF_MARKER,
        }
    }
}

/// Marker files in the state directory.
pub struct Markers {
    dir: PathBuf,
}

impl Markers {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Drop a marker for the next invocation to find.
    pub fn place(&self, marker: &Marker) -> Result<PathBuf> {
        let body = match marker {
            Marker::ForceComplete(reason) => reason.as_str(),
            Marker::Abort | Marker::Handoff => "",
        };
        let path = self.path(marker.name());
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        fs::write(&path, body)
            .with_context(|| format!("Failed to write marker: {}", path.display()))?;
        Ok(path)
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Remove every marker, returning the names that were present.
    pub fn clear(&self) -> Result<Vec<&'static str>> {
        let mut removed = Vec::new();
        for name in [ABORT_MARKER, FORCE_COMPLETE_MARKER, HANDOFF_MARKER] {
            if consume(&self.path(name))?.is_some() {
                removed.push(name);
            }
        }
        Ok(removed)
    }

    /// Read and delete the highest-precedence marker present.
    pub fn take(&self) -> Result<Option<Marker>> {
        if consume(&self.path(ABORT_MARKER))?.is_some() {
            return Ok(Some(Marker::Abort));
        }
        if let Some(body) = consume(&self.path(FORCE_COMPLETE_MARKER))? {
            let reason = body.trim();
            let reason = if reason.is_empty() {
                "no justification given".to_string()
            } else {
                reason.to_string()
            };
            return Ok(Some(Marker::ForceComplete(reason)));
        }
        if consume(&self.path(HANDOFF_MARKER))?.is_some() {
            return Ok(Some(Marker::Handoff));
        }
        Ok(None)
    }
}

fn consume(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read marker: {}", path.display()))?;
    fs::remove_file(path)
        .with_context(|| format!("Failed to consume marker: {}", path.display()))?;
    Ok(Some(body))
}

/// Why the loop let the worker exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    Aborted,
    ForceCompleted { reason: String },
    HandedOff,
    Stale { idle: Duration },
    CeilingReached { iteration: u32, ceiling: u32 },
}

impl Halt {
    pub fn kind(&self) -> &'static str {
        match self {
            Halt::Aborted => "aborted",
            Halt::ForceCompleted { .. } => "force_completed",
            Halt::HandedOff => "handed_off",
            Halt::Stale { .. } => "stale",
            Halt::CeilingReached { .. } => "ceiling_reached",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Halt::Aborted => "[phaseloop] Session cancelled by abort marker.".to_string(),
            Halt::ForceCompleted { reason } => {
                format!("[phaseloop] Session force-completed: {}", reason)
            }
            Halt::HandedOff => {
                "[phaseloop] Session handed off; exiting without touching state.".to_string()
            }
            Halt::Stale { idle } => format!(
                "[phaseloop] Session idle for {}h{}m; halting and leaving state for inspection.",
                idle.num_hours(),
                idle.num_minutes() % 60
            ),
            Halt::CeilingReached { iteration, ceiling } => format!(
                "[phaseloop] Iteration limit reached ({}/{}). Choose one:\n  \
                 - raise the ceiling: phaseloop raise-ceiling <N>\n  \
                 - accept the work: phaseloop force-complete --reason <text>\n  \
                 - abandon the task: phaseloop cancel",
                iteration, ceiling
            ),
        }
    }
}

pub struct SafetyValve {
    markers: Markers,
    staleness: Duration,
}

impl SafetyValve {
    pub fn new(markers: Markers, staleness_hours: u32) -> Self {
        Self {
            markers,
            staleness: Duration::hours(i64::from(staleness_hours)),
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Consume the highest-precedence operator marker, if any.
    pub fn take_marker(&self) -> Result<Option<Halt>> {
        Ok(self.markers.take()?.map(|marker| match marker {
            Marker::Abort => Halt::Aborted,
            Marker::ForceComplete(reason) => Halt::ForceCompleted { reason },
            Marker::Handoff => Halt::HandedOff,
        }))
    }

    /// First halt that applies, consuming any marker it finds.
    pub fn check(&self, session: &Session, now: DateTime<Utc>) -> Result<Option<Halt>> {
        if let Some(halt) = self.take_marker()? {
            return Ok(Some(halt));
        }

        let idle = now - session.last_activity;
        if idle > self.staleness {
            return Ok(Some(Halt::Stale { idle }));
        }

        if session.ceiling_reached() {
            return Ok(Some(Halt::CeilingReached {
                iteration: session.iteration,
                ceiling: session.ceiling,
            }));
        }

        Ok(None)
    }
}
