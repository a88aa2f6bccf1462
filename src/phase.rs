//! The phase state machine.
//!
//! ```text
//! CHALLENGE → PLAN → BUILD → REVIEW ⇄ FIX → SHIP → COMPLETE
//! ```
//!
//! Each phase names the sentinel(s) that let the worker leave it, the
//! instruction re-emitted while the worker is still inside it, and the phase
//! entered on success. The machine only advances when a sentinel is detected;
//! the verification gate is the only thing that moves it backwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Challenge,
    Plan,
    Build,
    Review,
    Fix,
    Ship,
    Complete,
}

/// A marker the worker emits as `<promise>TAG</promise>` to leave a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinel {
    pub tag: &'static str,
    pub next: Phase,
}

const CHALLENGE_EXITS: &[Sentinel] = &[Sentinel {
    tag: "CHALLENGE_COMPLETE",
    next: Phase::Plan,
}];
const PLAN_EXITS: &[Sentinel] = &[Sentinel {
    tag: "PLAN_COMPLETE",
    next: Phase::Build,
}];
const BUILD_EXITS: &[Sentinel] = &[Sentinel {
    tag: "BUILD_COMPLETE",
    next: Phase::Review,
}];
// Order matters: the issues sentinel wins when both appear in one message.
const REVIEW_EXITS: &[Sentinel] = &[
    Sentinel {
        tag: "ISSUES_FOUND",
        next: Phase::Fix,
    },
    Sentinel {
        tag: "REVIEW_CLEAN",
        next: Phase::Ship,
    },
];
const FIX_EXITS: &[Sentinel] = &[Sentinel {
    tag: "FIXES_APPLIED",
    next: Phase::Review,
}];
const SHIP_EXITS: &[Sentinel] = &[Sentinel {
    tag: "SHIPPED",
    next: Phase::Complete,
}];

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Challenge,
        Phase::Plan,
        Phase::Build,
        Phase::Review,
        Phase::Fix,
        Phase::Ship,
        Phase::Complete,
    ];

    /// Where a new session starts.
    pub fn initial(skip_challenge: bool) -> Self {
        if skip_challenge {
            Phase::Plan
        } else {
            Phase::Challenge
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Challenge => "CHALLENGE",
            Phase::Plan => "PLAN",
            Phase::Build => "BUILD",
            Phase::Review => "REVIEW",
            Phase::Fix => "FIX",
            Phase::Ship => "SHIP",
            Phase::Complete => "COMPLETE",
        }
    }

    /// Position in the forward order. REVIEW and FIX share a rank since they
    /// cycle until review is clean.
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Challenge => 0,
            Phase::Plan => 1,
            Phase::Build => 2,
            Phase::Review | Phase::Fix => 3,
            Phase::Ship => 4,
            Phase::Complete => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == Phase::Complete
    }

    /// Sentinels accepted in this phase, in precedence order.
    pub fn exits(&self) -> &'static [Sentinel] {
        match self {
            Phase::Challenge => CHALLENGE_EXITS,
            Phase::Plan => PLAN_EXITS,
            Phase::Build => BUILD_EXITS,
            Phase::Review => REVIEW_EXITS,
            Phase::Fix => FIX_EXITS,
            Phase::Ship => SHIP_EXITS,
            Phase::Complete => &[],
        }
    }

    pub fn sentinel_tags(&self) -> Vec<&'static str> {
        self.exits().iter().map(|s| s.tag).collect()
    }

    /// The phase entered when `tag` is observed, if `tag` is a legal exit.
    pub fn next_on(&self, tag: &str) -> Option<Phase> {
        self.exits().iter().find(|s| s.tag == tag).map(|s| s.next)
    }

    /// The instruction re-injected while the worker is inside this phase.
    pub fn instruction(&self, ctx: &InstructionContext<'_>) -> String {
        let mut body = match self {
            Phase::Challenge => format!(
                "Challenge the task before planning. Restate it, list the assumptions it \
                 makes, and call out anything ambiguous or risky.\n\nTask:\n{}",
                ctx.task
            ),
            Phase::Plan => format!(
                "Write a step-by-step plan with acceptance criteria to {} as a markdown \
                 checklist (`- [ ] step`). Keep steps small enough to verify one at a \
                 time.\n\nTask:\n{}",
                ctx.plan_file.display(),
                ctx.task
            ),
            Phase::Build if ctx.shared_queue => format!(
                "Work the shared queue. Claim an item with `phaseloop queue claim`, \
                 implement only that item against the plan in {} and commit it. Record \
                 test, type, lint and build results with `phaseloop evidence record`.",
                ctx.plan_file.display()
            ),
            Phase::Build => format!(
                "Implement the plan in {}. Tick each checklist item as it lands. Record \
                 test, type, lint and build results with `phaseloop evidence record`.",
                ctx.plan_file.display()
            ),
            Phase::Review => format!(
                "Review the changes against the plan's acceptance criteria. Write every \
                 problem found to {} as `- [ ] issue` lines. Emit ISSUES_FOUND if any \
                 exist, otherwise REVIEW_CLEAN.",
                ctx.issues_file.display()
            ),
            Phase::Fix => format!(
                "Fix every open item in {}. Re-run the checks and re-record evidence \
                 before returning to review.",
                ctx.issues_file.display()
            ),
            Phase::Ship => match ctx.publish_script {
                Some(script) => format!(
                    "Publish the work by running {}. Wait for CI and record the publish \
                     evidence.",
                    script.display()
                ),
                None if ctx.shared_queue => "Publish each claimed item with \
                                             `phaseloop publish <ITEM> --wait-ci`, which \
                                             rebases on rejection and records the publish \
                                             evidence. Claim the next item with \
                                             `phaseloop queue claim` until none are left."
                    .to_string(),
                None => "Commit the work and push it with `git push`, then run \
                         `phaseloop ci wait` to wait for CI and record the publish evidence."
                    .to_string(),
            },
            Phase::Complete => "The task is complete.".to_string(),
        };

        for note in &ctx.notes {
            body.push_str("\n\n");
            body.push_str(note);
        }
        body
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SessionError::UnknownPhase(s.to_string()))
    }
}

/// Inputs to a phase's instruction payload.
#[derive(Debug, Clone)]
pub struct InstructionContext<'a> {
    pub task: &'a str,
    pub plan_file: &'a Path,
    pub issues_file: &'a Path,
    pub publish_script: Option<&'a Path>,
    /// Work items are waiting in the shared queue
    pub shared_queue: bool,
    /// Extra paragraphs appended after the phase body (gate findings, etc.)
    pub notes: Vec<String>,
}

/// Format the one-line status that accompanies every blocking response.
pub fn status_line(phase: Phase, iteration: u32, ceiling: u32) -> String {
    let emit = phase
        .sentinel_tags()
        .iter()
        .map(|tag| format!("<promise>{}</promise>", tag))
        .collect::<Vec<_>>()
        .join(" or ");
    format!(
        "[phaseloop] phase {} | iteration {}/{} | emit {} to advance",
        phase, iteration, ceiling, emit
    )
}
