//! Session lifecycle commands: init, start, status and the operator actions.

use anyhow::Result;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use phaseloop::clock::SystemClock;
use phaseloop::init::is_initialized;
use phaseloop::orchestrator::{IssuesFile, Orchestrator, StartRequest, read_progress};
use phaseloop::phaseloop_config::PhaseloopConfig;
use phaseloop::queue::{ItemStatus, LedgerOutcome, QueueStore};
use phaseloop::safety::{ABORT_MARKER, FORCE_COMPLETE_MARKER, HANDOFF_MARKER, Halt, Marker, Markers};
use phaseloop::session::{FileSessionStore, SessionStore, Tier};

fn store(config: &PhaseloopConfig) -> FileSessionStore {
    FileSessionStore::new(
        config.session_file(),
        config.task_file(),
        config.archive_dir(),
    )
}

pub fn cmd_init(config: &PhaseloopConfig) -> Result<()> {
    use phaseloop::init::init_project;

    let result = init_project(&config.project_dir)?;
    if result.created {
        println!(
            "Initialized phaseloop project at {}",
            result.state_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .phaseloop/");
        println!("  ├── phaseloop.toml  # Ceilings, lease, publish settings");
        println!("  ├── archive/        # Finished sessions");
        println!("  ├── logs/           # Tracing output");
        println!("  └── queue/          # Shared backlog");
        println!();
        println!("Next steps:");
        println!("  1. Register `phaseloop hook` as the host's stop hook");
        println!("  2. Run `phaseloop start --tier standard <task>`");
    } else {
        println!(
            "Phaseloop project already initialized at {}",
            result.state_dir.display()
        );
        if result.wrote_config {
            println!("Wrote default phaseloop.toml.");
        }
        println!("Directory structure verified.");
    }
    Ok(())
}

pub fn cmd_start(
    config: &PhaseloopConfig,
    tier: Tier,
    skip_challenge: bool,
    publish_script: Option<PathBuf>,
    task: &[String],
) -> Result<()> {
    let task = task.join(" ");
    if task.trim().is_empty() {
        anyhow::bail!("Task description is empty");
    }
    config.ensure_directories()?;

    let store = store(config);
    let orchestrator = Orchestrator::new(&store, Arc::new(SystemClock), config);
    let session = orchestrator.start(StartRequest {
        task,
        tier,
        skip_challenge,
        publish_script,
    })?;

    println!(
        "{} session {}",
        style("Started").green().bold(),
        session.id
    );
    println!("  Phase:   {}", session.phase);
    println!("  Tier:    {} (ceiling {})", session.tier, session.ceiling);
    if let Some(script) = &session.publish_script {
        println!("  Publish: {}", script.display());
    }
    Ok(())
}

pub fn cmd_status(config: &PhaseloopConfig) -> Result<()> {
    println!();
    println!("Phaseloop Status");
    println!("================");
    println!();

    if !is_initialized(&config.project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'phaseloop init' to initialize the project.");
        println!();
        return Ok(());
    }

    match store(config).read()? {
        None => {
            println!("Session:   none (run 'phaseloop start')");
        }
        Some(session) => {
            println!("Session:   {}", session.id);
            println!("Task:      {}", session.task.lines().next().unwrap_or(""));
            println!("Phase:     {}", style(session.phase).cyan().bold());
            let iteration = format!("{}/{}", session.iteration, session.ceiling);
            let iteration = if session.ceiling_reached() {
                style(iteration).red().to_string()
            } else {
                iteration
            };
            println!("Iteration: {} ({})", iteration, session.tier);
            println!(
                "Activity:  started {}, last {}",
                session.started_at.format("%Y-%m-%d %H:%M:%S"),
                session.last_activity.format("%Y-%m-%d %H:%M:%S")
            );

            let plan = read_progress(&config.plan_file())?;
            if plan.total() > 0 {
                println!("Plan:      {}/{} items done", plan.done, plan.total());
            } else {
                println!("Plan:      no checklist yet");
            }
            let issues = IssuesFile::new(config.issues_file()).open_items()?;
            println!("Issues:    {} open", issues.len());
        }
    }

    let markers = Markers::new(config.state_dir.clone());
    let pending: Vec<&str> = [ABORT_MARKER, FORCE_COMPLETE_MARKER, HANDOFF_MARKER]
        .into_iter()
        .filter(|name| markers.is_present(name))
        .collect();
    if !pending.is_empty() {
        println!("Markers:   {} pending", pending.join(", "));
    }

    let queue_dir = config.queue_dir();
    if queue_dir.join("backlog.json").exists() || queue_dir.join("ledger.json").exists() {
        let state = QueueStore::new(queue_dir).snapshot()?;
        let count = |status: ItemStatus| state.backlog.iter().filter(|i| i.status == status).count();
        let completed = state
            .ledger
            .iter()
            .filter(|e| matches!(e.outcome, LedgerOutcome::Completed { .. }))
            .count();
        let skipped = state.ledger.len() - completed;
        println!();
        println!(
            "Queue:     {} unclaimed, {} claimed, {} completed, {} skipped",
            count(ItemStatus::Unclaimed),
            state.claims.len(),
            completed,
            skipped
        );
        if !state.conflicts.is_empty() {
            println!(
                "Conflicts: {}",
                style(state.conflicts.len()).yellow().bold()
            );
        }
        if !state.escalations.is_empty() {
            println!(
                "Escalated: {}",
                style(state.escalations.len()).red().bold()
            );
        }
    }
    println!();
    Ok(())
}

/// Place a marker, then honor it right away.
fn place_and_apply(config: &PhaseloopConfig, marker: Marker) -> Result<Option<Halt>> {
    let store = store(config);
    let orchestrator = Orchestrator::new(&store, Arc::new(SystemClock), config);
    orchestrator.place_marker(&marker)?;
    orchestrator.apply_markers()
}

pub fn cmd_cancel(config: &PhaseloopConfig) -> Result<()> {
    if let Some(halt) = place_and_apply(config, Marker::Abort)? {
        println!("{}", halt.message());
    }
    Ok(())
}

pub fn cmd_force_complete(config: &PhaseloopConfig, reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        anyhow::bail!("force-complete requires a non-empty --reason");
    }
    if let Some(halt) = place_and_apply(config, Marker::ForceComplete(reason.trim().to_string()))? {
        println!("{}", halt.message());
    }
    Ok(())
}

/// The worker is still running: the marker is consumed on its next stop.
pub fn cmd_handoff(config: &PhaseloopConfig) -> Result<()> {
    let store = store(config);
    let orchestrator = Orchestrator::new(&store, Arc::new(SystemClock), config);
    let path = orchestrator.place_marker(&Marker::Handoff)?;
    println!(
        "Handoff marker placed at {}. The worker exits on its next stop; the session stays intact.",
        path.display()
    );
    Ok(())
}

pub fn cmd_raise_ceiling(config: &PhaseloopConfig, ceiling: u32) -> Result<()> {
    let store = store(config);
    let orchestrator = Orchestrator::new(&store, Arc::new(SystemClock), config);
    let session = orchestrator.raise_ceiling(ceiling)?;
    println!(
        "Ceiling raised to {} (iteration {}).",
        session.ceiling, session.iteration
    );
    Ok(())
}
