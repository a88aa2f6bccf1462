use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority class. Claims scan high, then medium, then low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => anyhow::bail!("Unknown priority '{}'. Valid: high, medium, low", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Unclaimed,
    Claimed,
    Completed,
    Failed,
    ConflictBlocked,
    /// Held until an operator clears the escalation
    Escalated,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Unclaimed => "unclaimed",
            ItemStatus::Claimed => "claimed",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::ConflictBlocked => "conflict-blocked",
            ItemStatus::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// One atomic, independently claimable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub status: ItemStatus,
    /// Errors from prior failed attempts, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            priority,
            attempts: 0,
            status: ItemStatus::Unclaimed,
            errors: Vec::new(),
            created_at: now,
        }
    }

    /// The previous attempt's error, for retry context.
    pub fn last_error(&self) -> Option<&str> {
        self.errors.last().map(String::as_str)
    }
}

/// A time-bounded lease on one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub item_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    /// A claim is void strictly after its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LedgerOutcome {
    Completed { commit: String },
    Skipped { errors: Vec<String> },
}

/// A finished item: completed with evidence, or skipped after repeated failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub item: WorkItem,
    #[serde(flatten)]
    pub outcome: LedgerOutcome,
    pub worker: String,
    pub recorded_at: DateTime<Utc>,
}

/// Unpushed work that could not be rebased onto the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub item_id: String,
    pub worker: String,
    pub blocked_at: DateTime<Utc>,
    /// Branch the work was being published to
    pub branch: String,
    pub paths: Vec<String>,
    pub local_rev: String,
    pub remote_rev: String,
    pub recovery_branch: String,
}

/// An item whose consecutive failures reached the escalation threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub item_id: String,
    pub title: String,
    pub failures: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

/// How a worker gives an item back.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Success { commit: String },
    Failure { error: String },
    /// Not the item's fault; no attempt is counted
    Conflict(ConflictRecord),
}

/// What happened to the item as a result of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Requeued { attempts: u32 },
    Escalated { attempts: u32 },
    Skipped { attempts: u32 },
    ConflictBlocked,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Completed => write!(f, "completed"),
            Disposition::Requeued { attempts } => write!(f, "requeued after {} attempt(s)", attempts),
            Disposition::Escalated { attempts } => {
                write!(f, "escalated after {} attempt(s)", attempts)
            }
            Disposition::Skipped { attempts } => write!(f, "skipped after {} attempt(s)", attempts),
            Disposition::ConflictBlocked => write!(f, "conflict-blocked"),
        }
    }
}
