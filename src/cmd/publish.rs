//! Publish and CI commands.

use anyhow::Result;
use console::style;
use std::sync::Arc;
use std::time::Duration;

use phaseloop::clock::{Clock, SystemClock};
use phaseloop::errors::PublishError;
use phaseloop::phaseloop_config::PhaseloopConfig;
use phaseloop::publish::{
    CiVerdict, GitCli, GithubActions, PublishOutcome, PublishPipeline, Vcs, parse_owner_repo,
    wait_for_ci,
};
use phaseloop::verify::EvidenceStore;

use super::queue::coordinator;

pub async fn cmd_publish(
    config: &PhaseloopConfig,
    item: &str,
    worker: Option<String>,
    branch: Option<&str>,
    wait_ci: bool,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let worker = worker.unwrap_or_else(|| config.worker_id());
    let queue = coordinator(config, clock.clone());
    let vcs = GitCli::new(config.project_dir.clone());
    let pipeline = PublishPipeline::new(&vcs, &queue, clock, config.toml.publish.clone());

    match pipeline.publish(item, &worker, branch).await? {
        PublishOutcome::Published {
            commit,
            push_attempts,
        } => {
            println!(
                "{} {} at {} ({} push attempt(s))",
                style("Published").green().bold(),
                item,
                commit,
                push_attempts
            );
            if wait_ci {
                wait(config, &vcs, Some(commit)).await?;
            }
        }
        PublishOutcome::Conflict(record) => {
            println!(
                "{} {}: work preserved on {}",
                style("Conflict").yellow().bold(),
                item,
                record.recovery_branch
            );
            for path in &record.paths {
                println!("    {}", path);
            }
            println!("Item released without charging an attempt. Claim the next item.");
        }
        PublishOutcome::Failed { error, disposition } => {
            println!(
                "{} {}: {} ({})",
                style("Failed").red().bold(),
                item,
                error,
                disposition
            );
            anyhow::bail!("Publish failed for {}", item);
        }
    }
    Ok(())
}

pub async fn cmd_ci_wait(config: &PhaseloopConfig, sha: Option<String>) -> Result<()> {
    let vcs = GitCli::new(config.project_dir.clone());
    wait(config, &vcs, sha).await
}

async fn wait(config: &PhaseloopConfig, vcs: &dyn Vcs, sha: Option<String>) -> Result<()> {
    let settings = &config.toml.publish;
    let sha = match sha {
        Some(sha) => sha,
        None => vcs.head_rev().await?,
    };
    let url = vcs.remote_url(&settings.remote).await?;
    let owner_repo = parse_owner_repo(&url).ok_or(PublishError::UnknownRemote(url))?;
    let mut ci = GithubActions::new(owner_repo, std::env::var("GITHUB_TOKEN").ok());
    // Set by Actions runners and GitHub Enterprise hosts
    if let Ok(base) = std::env::var("GITHUB_API_URL") {
        ci = ci.with_api_base(base);
    }
    let evidence = EvidenceStore::new(config.evidence_file());

    println!("Waiting for CI on {}...", sha);
    let verdict = wait_for_ci(
        &ci,
        &SystemClock,
        &evidence,
        &sha,
        Duration::from_secs(settings.ci_poll_interval_secs),
        Duration::from_secs(settings.ci_timeout_secs),
    )
    .await?;

    match verdict {
        CiVerdict::Passed => {
            println!("{} CI passed", style("✓").green().bold());
            Ok(())
        }
        CiVerdict::Failed { detail } => {
            println!("{} CI failed: {}", style("✗").red().bold(), detail);
            anyhow::bail!("CI failed for {}", sha)
        }
        CiVerdict::TimedOut { waited } => {
            println!(
                "{} CI did not finish within {}s",
                style("✗").red().bold(),
                waited.as_secs()
            );
            anyhow::bail!("CI timed out for {}", sha)
        }
    }
}
