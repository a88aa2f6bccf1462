//! Unified configuration for phaseloop.
//!
//! Settings are read from `.phaseloop/phaseloop.toml`; every field has a
//! default so the file is optional. Layering is file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [session]
//! staleness_hours = 8
//! skip_challenge = false
//!
//! [ceilings]
//! trivial = 3
//! standard = 10
//! complex = 20
//!
//! [detector]
//! tail_bytes = 51200
//! max_entries = 10
//!
//! [queue]
//! lease_minutes = 30
//! max_attempts = 3
//! escalation_threshold = 3
//!
//! [publish]
//! remote = "origin"
//! max_push_attempts = 3
//! recovery_prefix = "phaseloop/recovery"
//! ci_poll_interval_secs = 15
//! ci_timeout_secs = 600
//!
//! [verification]
//! required = ["tests", "types", "lint", "build", "publish"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::Tier;
use crate::verify::EvidenceCategory;

/// The name of the phaseloop state directory.
pub const PHASELOOP_DIR: &str = ".phaseloop";

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Hours without activity after which the loop halts
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u32,
    /// Start new sessions at PLAN instead of CHALLENGE
    #[serde(default)]
    pub skip_challenge: bool,
}

fn default_staleness_hours() -> u32 {
    8
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            staleness_hours: default_staleness_hours(),
            skip_challenge: false,
        }
    }
}

/// Iteration ceilings per complexity tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeilingsSection {
    #[serde(default = "default_trivial_ceiling")]
    pub trivial: u32,
    #[serde(default = "default_standard_ceiling")]
    pub standard: u32,
    #[serde(default = "default_complex_ceiling")]
    pub complex: u32,
}

fn default_trivial_ceiling() -> u32 {
    3
}

fn default_standard_ceiling() -> u32 {
    10
}

fn default_complex_ceiling() -> u32 {
    20
}

impl Default for CeilingsSection {
    fn default() -> Self {
        Self {
            trivial: default_trivial_ceiling(),
            standard: default_standard_ceiling(),
            complex: default_complex_ceiling(),
        }
    }
}

impl CeilingsSection {
    pub fn for_tier(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Trivial => self.trivial,
            Tier::Standard => self.standard,
            Tier::Complex => self.complex,
        }
    }
}

/// Completion detector window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSection {
    /// Bytes read from the end of the transcript
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u64,
    /// Worker-authored entries inspected, newest first
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_tail_bytes() -> u64 {
    50 * 1024
}

fn default_max_entries() -> usize {
    10
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            tail_bytes: default_tail_bytes(),
            max_entries: default_max_entries(),
        }
    }
}

/// Claim coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_lease_minutes")]
    pub lease_minutes: u32,
    /// Failed attempts after which an item is skipped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Consecutive failures after which an escalation record is raised
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

fn default_lease_minutes() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_escalation_threshold() -> u32 {
    3
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            lease_minutes: default_lease_minutes(),
            max_attempts: default_max_attempts(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

/// Publish pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSection {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_max_push_attempts")]
    pub max_push_attempts: u32,
    /// Prefix for quarantine branches holding conflicted work
    #[serde(default = "default_recovery_prefix")]
    pub recovery_prefix: String,
    #[serde(default = "default_ci_poll_interval_secs")]
    pub ci_poll_interval_secs: u64,
    #[serde(default = "default_ci_timeout_secs")]
    pub ci_timeout_secs: u64,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_max_push_attempts() -> u32 {
    3
}

fn default_recovery_prefix() -> String {
    "phaseloop/recovery".to_string()
}

fn default_ci_poll_interval_secs() -> u64 {
    15
}

fn default_ci_timeout_secs() -> u64 {
    600
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            max_push_attempts: default_max_push_attempts(),
            recovery_prefix: default_recovery_prefix(),
            ci_poll_interval_secs: default_ci_poll_interval_secs(),
            ci_timeout_secs: default_ci_timeout_secs(),
        }
    }
}

/// Verification gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSection {
    /// Evidence categories that must be present and passing before COMPLETE
    #[serde(default = "default_required_categories")]
    pub required: Vec<EvidenceCategory>,
}

fn default_required_categories() -> Vec<EvidenceCategory> {
    EvidenceCategory::all().to_vec()
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            required: default_required_categories(),
        }
    }
}

/// The complete phaseloop.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseloopToml {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub ceilings: CeilingsSection,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub verification: VerificationSection,
}

impl PhaseloopToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phaseloop.toml")
    }

    /// Load `phaseloop.toml` from the state directory, or defaults if absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join("phaseloop.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize phaseloop.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.session.staleness_hours == 0 {
            warnings.push("session.staleness_hours is 0: every invocation will halt as stale".into());
        }
        for (name, value) in [
            ("trivial", self.ceilings.trivial),
            ("standard", self.ceilings.standard),
            ("complex", self.ceilings.complex),
        ] {
            if value == 0 {
                warnings.push(format!("ceilings.{} is 0: the loop will never block", name));
            }
        }
        if self.detector.max_entries == 0 {
            warnings.push("detector.max_entries is 0: no sentinel will ever be seen".into());
        }
        if self.queue.lease_minutes == 0 {
            warnings.push("queue.lease_minutes is 0: claims expire immediately".into());
        }
        if self.queue.escalation_threshold > self.queue.max_attempts {
            warnings.push(format!(
                "queue.escalation_threshold ({}) exceeds queue.max_attempts ({}): items are skipped before escalating",
                self.queue.escalation_threshold, self.queue.max_attempts
            ));
        }
        if self.publish.max_push_attempts == 0 {
            warnings.push(
                "publish.max_push_attempts is 0: treated as 1, a single push with no retry".into(),
            );
        }
        if self.publish.ci_poll_interval_secs == 0 {
            warnings.push("publish.ci_poll_interval_secs is 0: CI will be polled in a busy loop".into());
        }

        warnings
    }
}

/// Resolved configuration: file settings plus every path under `.phaseloop/`.
#[derive(Debug, Clone)]
pub struct PhaseloopConfig {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub toml: PhaseloopToml,
    pub verbose: bool,
}

impl PhaseloopConfig {
    /// Load configuration for a project directory.
    ///
    /// The project directory need not contain `.phaseloop/` yet.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(PHASELOOP_DIR);
        let toml = PhaseloopToml::load_or_default(&state_dir)?;

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            verbose,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.state_dir.clone(),
            self.archive_dir(),
            self.log_dir(),
            self.queue_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join("phaseloop.toml")
    }

    pub fn session_file(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }

    pub fn task_file(&self) -> PathBuf {
        self.state_dir.join("task.md")
    }

    pub fn plan_file(&self) -> PathBuf {
        self.state_dir.join("plan.md")
    }

    pub fn issues_file(&self) -> PathBuf {
        self.state_dir.join("issues.md")
    }

    pub fn evidence_file(&self) -> PathBuf {
        self.state_dir.join("evidence.json")
    }

    pub fn audit_file(&self) -> PathBuf {
        self.state_dir.join("audit.jsonl")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.state_dir.join("archive")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.state_dir.join("queue")
    }

    /// Worker identity: `PHASELOOP_WORKER_ID`, else host name plus pid.
    pub fn worker_id(&self) -> String {
        std::env::var("PHASELOOP_WORKER_ID").unwrap_or_else(|_| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
            format!("{}-{}", host, std::process::id())
        })
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
