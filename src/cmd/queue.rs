//! Shared backlog commands: queue, conflicts, escalations.

use anyhow::Result;
use console::style;
use std::sync::Arc;

use phaseloop::clock::{Clock, SystemClock};
use phaseloop::phaseloop_config::PhaseloopConfig;
use phaseloop::publish::{GitCli, PublishPipeline};
use phaseloop::queue::{
    ItemStatus, LedgerOutcome, QueueCoordinator, QueueStore, ReleaseOutcome,
};

use super::super::{ConflictsCommands, EscalationsCommands, QueueCommands};

pub fn coordinator(config: &PhaseloopConfig, clock: Arc<dyn Clock>) -> QueueCoordinator {
    QueueCoordinator::new(
        QueueStore::new(config.queue_dir()),
        clock,
        &config.toml.queue,
    )
}

fn worker_or_default(config: &PhaseloopConfig, worker: Option<String>) -> String {
    worker.unwrap_or_else(|| config.worker_id())
}

pub fn cmd_queue(config: &PhaseloopConfig, command: QueueCommands) -> Result<()> {
    let queue = coordinator(config, Arc::new(SystemClock));

    match command {
        QueueCommands::Add {
            title,
            description,
            priority,
        } => {
            let item = queue.add(&title, description.as_deref().unwrap_or(""), priority)?;
            println!("Added {} [{}] {}", item.id, item.priority, item.title);
        }
        QueueCommands::List => {
            let state = queue.snapshot()?;
            println!();
            println!(
                "{:<8} {:<8} {:<17} {:<8} Title",
                "Item", "Priority", "Status", "Attempts"
            );
            println!(
                "{:<8} {:<8} {:<17} {:<8} -----",
                "--------", "--------", "-----------------", "--------"
            );
            for item in &state.backlog {
                let status = match state.claims.get(&item.id) {
                    Some(claim) => format!("claimed:{}", claim.holder),
                    None => item.status.to_string(),
                };
                println!(
                    "{:<8} {:<8} {:<17} {:<8} {}",
                    item.id, item.priority, status, item.attempts, item.title
                );
            }
            for entry in &state.ledger {
                let status = match &entry.outcome {
                    LedgerOutcome::Completed { .. } => style("completed").green().to_string(),
                    LedgerOutcome::Skipped { .. } => style("skipped").red().to_string(),
                };
                println!(
                    "{:<8} {:<8} {:<17} {:<8} {}",
                    entry.item.id,
                    entry.item.priority,
                    status,
                    entry.item.attempts,
                    style(&entry.item.title).dim()
                );
            }
            println!();
        }
        QueueCommands::Claim { worker } => {
            let worker = worker_or_default(config, worker);
            match queue.claim(&worker)? {
                Some(item) => {
                    println!("Claimed {} for {}", item.id, worker);
                    println!("  Title:    {}", item.title);
                    if !item.description.is_empty() {
                        println!("  Accept:   {}", item.description);
                    }
                    println!("  Attempts: {}", item.attempts);
                    if let Some(error) = item.last_error() {
                        println!("  Previous failure: {}", error);
                    }
                }
                None => println!("No claimable work items."),
            }
        }
        QueueCommands::Release {
            item,
            success,
            failure,
            commit,
            error,
            worker,
        } => {
            let worker = worker_or_default(config, worker);
            let outcome = if success && !failure {
                let Some(commit) = commit else {
                    anyhow::bail!("--success requires --commit <SHA>");
                };
                ReleaseOutcome::Success { commit }
            } else {
                let Some(error) = error else {
                    anyhow::bail!("--failure requires --error <TEXT>");
                };
                ReleaseOutcome::Failure { error }
            };
            let disposition = queue.release(&item, &worker, outcome)?;
            println!("Released {}: {}", item, disposition);
        }
        QueueCommands::Steal => {
            let stolen = queue.steal_expired()?;
            if stolen.is_empty() {
                println!("No expired claims.");
            } else {
                println!("Released expired claims: {}", stolen.join(", "));
            }
        }
    }
    Ok(())
}

pub async fn cmd_conflicts(config: &PhaseloopConfig, command: ConflictsCommands) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = coordinator(config, clock.clone());

    match command {
        ConflictsCommands::List => {
            let state = queue.snapshot()?;
            if state.conflicts.is_empty() {
                println!("No conflicts.");
                return Ok(());
            }
            for record in &state.conflicts {
                println!(
                    "{} {} (worker {}, {})",
                    style("conflict").yellow().bold(),
                    record.item_id,
                    record.worker,
                    record.blocked_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!("  Recovery branch: {}", record.recovery_branch);
                println!(
                    "  Local {} vs remote {} on {}",
                    short(&record.local_rev),
                    short(&record.remote_rev),
                    record.branch
                );
                for path in &record.paths {
                    println!("    {}", path);
                }
            }
        }
        ConflictsCommands::Reconcile => {
            let vcs = GitCli::new(config.project_dir.clone());
            let pipeline =
                PublishPipeline::new(&vcs, &queue, clock, config.toml.publish.clone());
            let settled = pipeline.reconcile_conflicts().await?;
            if settled.is_empty() {
                println!("No conflicts reconciled.");
            } else {
                println!("Reconciled: {}", settled.join(", "));
            }
        }
        ConflictsCommands::Resolve { item } => {
            let record = queue.resolve_conflict(&item)?;
            println!(
                "Resolved conflict for {}; item requeued. Recovery branch {} kept.",
                record.item_id, record.recovery_branch
            );
        }
    }
    Ok(())
}

pub fn cmd_escalations(config: &PhaseloopConfig, command: EscalationsCommands) -> Result<()> {
    let queue = coordinator(config, Arc::new(SystemClock));

    match command {
        EscalationsCommands::List => {
            let state = queue.snapshot()?;
            if state.escalations.is_empty() {
                println!("No escalations.");
                return Ok(());
            }
            for record in &state.escalations {
                let held = state
                    .item(&record.item_id)
                    .map(|i| i.status == ItemStatus::Escalated)
                    .unwrap_or(false);
                println!(
                    "{} {} {}{}",
                    style("escalated").red().bold(),
                    record.item_id,
                    record.title,
                    if held { "" } else { " (skipped)" }
                );
                for (n, failure) in record.failures.iter().enumerate() {
                    println!("  {}. {}", n + 1, failure);
                }
            }
        }
        EscalationsCommands::Clear { item } => {
            let item = queue.clear_escalation(&item)?;
            println!("Cleared escalation for {}; requeued with a fresh attempt budget.", item.id);
        }
    }
    Ok(())
}

fn short(rev: &str) -> &str {
    rev.get(..8).unwrap_or(rev)
}
