use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

use phaseloop::phaseloop_config::PhaseloopConfig;
use phaseloop::queue::Priority;
use phaseloop::session::Tier;
use phaseloop::verify::EvidenceCategory;

mod cmd;

#[derive(Parser)]
#[command(name = "phaseloop")]
#[command(version, about = "Deterministic phase-loop orchestrator for autonomous workers")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .phaseloop directory
    Init,
    /// Start a new session for a task
    Start {
        /// Complexity tier: selects the iteration ceiling
        #[arg(long, default_value = "standard")]
        tier: Tier,
        /// Begin at PLAN instead of CHALLENGE
        #[arg(long)]
        skip_challenge: bool,
        /// Script the SHIP phase should run to publish
        #[arg(long)]
        publish_script: Option<PathBuf>,
        /// Task description
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
    },
    /// Evaluate one stop attempt (host stop hook). Reads host JSON on stdin
    /// unless --session or --transcript is given.
    Hook {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Show session, plan progress and queue state
    Status,
    /// Cancel the active session
    Cancel,
    /// Release the worker to an external actor, keeping the session
    Handoff,
    /// Complete the active session without verification
    ForceComplete {
        /// Justification, kept on the archived session
        #[arg(long)]
        reason: String,
    },
    /// Raise the iteration ceiling of the active session
    RaiseCeiling { ceiling: u32 },
    /// Run the verification gate against recorded evidence
    Verify,
    /// Record test/type/lint/build/publish evidence
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommands,
    },
    /// Shared work queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Publish conflicts parked on recovery branches
    Conflicts {
        #[command(subcommand)]
        command: ConflictsCommands,
    },
    /// Items held after repeated failures
    Escalations {
        #[command(subcommand)]
        command: EscalationsCommands,
    },
    /// Push a claimed item's work, rebasing and retrying on rejection
    Publish {
        item: String,
        #[arg(long)]
        worker: Option<String>,
        /// Target branch (defaults to the current branch)
        #[arg(long)]
        branch: Option<String>,
        /// Wait for CI after a successful push
        #[arg(long)]
        wait_ci: bool,
    },
    /// Continuous integration
    Ci {
        #[command(subcommand)]
        command: CiCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show the decision trail
    Audit {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum EvidenceCommands {
    #[command(group(ArgGroup::new("result").required(true).args(["passed", "failed"])))]
    Record {
        category: EvidenceCategory,
        #[arg(long)]
        passed: bool,
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        detail: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum QueueCommands {
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },
    List,
    Claim {
        #[arg(long)]
        worker: Option<String>,
    },
    #[command(group(ArgGroup::new("result").required(true).args(["success", "failure"])))]
    Release {
        item: String,
        #[arg(long)]
        success: bool,
        #[arg(long)]
        failure: bool,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        error: Option<String>,
        #[arg(long)]
        worker: Option<String>,
    },
    /// Void every expired claim
    Steal,
}

#[derive(Subcommand, Clone)]
pub enum ConflictsCommands {
    List,
    /// Settle conflicts whose work the remote already contains
    Reconcile,
    /// Drop a conflict record and requeue its item
    Resolve { item: String },
}

#[derive(Subcommand, Clone)]
pub enum EscalationsCommands {
    List,
    /// Requeue an escalated item with a fresh attempt budget
    Clear { item: String },
}

#[derive(Subcommand, Clone)]
pub enum CiCommands {
    /// Poll CI for a commit and record publish evidence
    Wait {
        /// Commit to wait for (defaults to HEAD)
        #[arg(long)]
        sha: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default phaseloop.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = PhaseloopConfig::new(project_dir, cli.verbose)?;

    let log_dir = config.state_dir.exists().then(|| config.log_dir());
    let _guard = phaseloop::logging::init(log_dir.as_deref(), cli.verbose)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Start {
            tier,
            skip_challenge,
            publish_script,
            task,
        } => cmd::cmd_start(&config, tier, skip_challenge, publish_script, &task)?,
        Commands::Hook {
            session,
            transcript,
        } => cmd::cmd_hook(&config, session, transcript)?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Cancel => cmd::cmd_cancel(&config)?,
        Commands::Handoff => cmd::cmd_handoff(&config)?,
        Commands::ForceComplete { reason } => cmd::cmd_force_complete(&config, &reason)?,
        Commands::RaiseCeiling { ceiling } => cmd::cmd_raise_ceiling(&config, ceiling)?,
        Commands::Verify => cmd::cmd_verify(&config)?,
        Commands::Evidence { command } => match command {
            EvidenceCommands::Record {
                category,
                passed,
                failed,
                detail,
            } => cmd::cmd_evidence_record(&config, category, passed && !failed, detail)?,
        },
        Commands::Queue { command } => cmd::cmd_queue(&config, command)?,
        Commands::Conflicts { command } => cmd::cmd_conflicts(&config, command).await?,
        Commands::Escalations { command } => cmd::cmd_escalations(&config, command)?,
        Commands::Publish {
            item,
            worker,
            branch,
            wait_ci,
        } => cmd::cmd_publish(&config, &item, worker, branch.as_deref(), wait_ci).await?,
        Commands::Ci { command } => match command {
            CiCommands::Wait { sha } => cmd::cmd_ci_wait(&config, sha).await?,
        },
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
        Commands::Audit { limit, json } => cmd::cmd_audit(&config, limit, json)?,
    }

    Ok(())
}
