//! Verification gate.
//!
//! The worker's `SHIPPED` sentinel is only a claim. Before a session may sit
//! in COMPLETE the gate re-derives pass/fail from the evidence record, and any
//! missing or failing category sends the session back to REVIEW.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::phase::Phase;
use crate::session::Session;
use crate::util::{atomic_write_json, read_json_or_default};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceCategory {
    Tests,
    Types,
    Lint,
    Build,
    Publish,
}

impl EvidenceCategory {
    pub fn all() -> &'static [EvidenceCategory] {
        &[
            EvidenceCategory::Tests,
            EvidenceCategory::Types,
            EvidenceCategory::Lint,
            EvidenceCategory::Build,
            EvidenceCategory::Publish,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceCategory::Tests => "tests",
            EvidenceCategory::Types => "types",
            EvidenceCategory::Lint => "lint",
            EvidenceCategory::Build => "build",
            EvidenceCategory::Publish => "publish",
        }
    }
}

impl fmt::Display for EvidenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvidenceCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown evidence category '{}'. Valid: tests, types, lint, build, publish",
                    s
                )
            })
    }
}

/// One recorded outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Entries without a timestamp are accepted as current
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// The evidence file: category name to latest outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRecord {
    pub entries: BTreeMap<EvidenceCategory, EvidenceEntry>,
}

impl EvidenceRecord {
    pub fn get(&self, category: EvidenceCategory) -> Option<&EvidenceEntry> {
        self.entries.get(&category)
    }

    pub fn set(&mut self, category: EvidenceCategory, entry: EvidenceEntry) {
        self.entries.insert(category, entry);
    }
}

/// File-backed evidence record at `.phaseloop/evidence.json`.
pub struct EvidenceStore {
    path: PathBuf,
}

impl EvidenceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<EvidenceRecord> {
        read_json_or_default(&self.path)
    }

    /// Overwrite the entry for `category`.
    pub fn record(
        &self,
        category: EvidenceCategory,
        passed: bool,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<EvidenceRecord> {
        let mut record = self.load()?;
        record.set(
            category,
            EvidenceEntry {
                passed,
                detail,
                recorded_at: Some(now),
            },
        );
        atomic_write_json(&self.path, &record)?;
        tracing::info!(category = %category, passed, "Recorded evidence");
        Ok(record)
    }
}

/// What the gate found. Empty lists mean the gate passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub missing: Vec<EvidenceCategory>,
    pub failing: Vec<(EvidenceCategory, Option<String>)>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.failing.is_empty()
    }

    /// Human-readable summary naming each gap.
    pub fn describe(&self) -> String {
        if self.passed() {
            return "Verification passed: all required evidence present and passing.".into();
        }
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            let names: Vec<&str> = self.missing.iter().map(|c| c.as_str()).collect();
            parts.push(format!("Missing evidence: {}", names.join(", ")));
        }
        if !self.failing.is_empty() {
            let names: Vec<String> = self
                .failing
                .iter()
                .map(|(c, detail)| match detail {
                    Some(d) => format!("{} ({})", c, d),
                    None => c.to_string(),
                })
                .collect();
            parts.push(format!("Failing evidence: {}", names.join(", ")));
        }
        parts.join(". ")
    }

    /// `- [ ]` lines for the outstanding-issues list.
    pub fn issue_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .missing
            .iter()
            .map(|c| format!("- [ ] No current {} evidence recorded", c))
            .collect();
        lines.extend(self.failing.iter().map(|(c, detail)| match detail {
            Some(d) => format!("- [ ] {} failing: {}", c, d),
            None => format!("- [ ] {} failing", c),
        }));
        lines
    }
}

#[derive(Debug, Clone)]
pub struct VerificationGate {
    required: Vec<EvidenceCategory>,
}

impl VerificationGate {
    pub fn new(required: Vec<EvidenceCategory>) -> Self {
        Self { required }
    }

    /// Judge `evidence`. Entries recorded before `since` are stale and count
    /// as missing. Pure: the same inputs always give the same verdict.
    pub fn evaluate(&self, evidence: &EvidenceRecord, since: Option<DateTime<Utc>>) -> Verdict {
        let mut verdict = Verdict::default();
        for &category in &self.required {
            match evidence.get(category) {
                None => verdict.missing.push(category),
                Some(entry) => {
                    let stale = matches!(
                        (entry.recorded_at, since),
                        (Some(at), Some(since)) if at < since
                    );
                    if stale {
                        verdict.missing.push(category);
                    } else if !entry.passed {
                        verdict.failing.push((category, entry.detail.clone()));
                    }
                }
            }
        }
        verdict
    }

    /// Apply a verdict to a session that claims completion. A failing verdict
    /// forces the session back to REVIEW and clears `complete`.
    pub fn enforce(&self, session: &mut Session, verdict: &Verdict) -> bool {
        if verdict.passed() {
            session.enter(Phase::Complete);
            true
        } else {
            tracing::warn!(
                session = %session.id,
                missing = ?verdict.missing,
                failing = ?verdict.failing,
                "Verification gate failed; returning to REVIEW"
            );
            session.enter(Phase::Review);
            false
        }
    }
}
