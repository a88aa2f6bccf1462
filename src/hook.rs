//! Host protocol types.
//!
//! The host invokes `phaseloop hook` every time the worker tries to stop,
//! passing a JSON object on stdin:
//!
//! ```json
//! {"session_id": "abc", "transcript_path": "/path/to/transcript.jsonl"}
//! ```
//!
//! phaseloop answers on stdout. An empty object (optionally with a
//! `systemMessage`) lets the worker exit; `{"decision": "block", "reason": ...}`
//! keeps it running with `reason` as its next instruction.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input the host sends on each stop attempt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    /// Set by the host when the worker is already continuing from a block
    #[serde(default)]
    pub stop_hook_active: bool,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl HookInput {
    /// Parse host input. Blank input is treated as an empty object.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).context("Failed to parse hook input JSON")
    }
}

/// What the orchestrator tells the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// The worker may exit.
    Allow { message: Option<String> },
    /// Re-inject `instruction`; `status` is the one-line progress summary.
    Block { instruction: String, status: String },
}

/// Wire form of a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(
        default,
        rename = "systemMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub system_message: Option<String>,
}

impl HookDecision {
    pub fn allow() -> Self {
        HookDecision::Allow { message: None }
    }

    pub fn allow_with(message: impl Into<String>) -> Self {
        HookDecision::Allow {
            message: Some(message.into()),
        }
    }

    pub fn block(instruction: impl Into<String>, status: impl Into<String>) -> Self {
        HookDecision::Block {
            instruction: instruction.into(),
            status: status.into(),
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, HookDecision::Block { .. })
    }

    pub fn response(&self) -> HookResponse {
        match self {
            HookDecision::Allow { message } => HookResponse {
                decision: None,
                reason: None,
                system_message: message.clone(),
            },
            HookDecision::Block {
                instruction,
                status,
            } => HookResponse {
                decision: Some("block".to_string()),
                reason: Some(format!("{}\n\n{}", instruction, status)),
                system_message: Some(status.clone()),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.response()).context("Failed to serialize hook response")
    }
}
