//! Verification gate and evidence commands.

use anyhow::Result;
use chrono::Utc;
use console::style;
use std::sync::Arc;

use phaseloop::clock::SystemClock;
use phaseloop::orchestrator::Orchestrator;
use phaseloop::phaseloop_config::PhaseloopConfig;
use phaseloop::session::FileSessionStore;
use phaseloop::verify::{EvidenceCategory, EvidenceStore};

pub fn cmd_verify(config: &PhaseloopConfig) -> Result<()> {
    let store = FileSessionStore::new(
        config.session_file(),
        config.task_file(),
        config.archive_dir(),
    );
    let orchestrator = Orchestrator::new(&store, Arc::new(SystemClock), config);
    let verdict = orchestrator.check_evidence()?;

    println!();
    for category in &config.toml.verification.required {
        let label = if verdict.missing.contains(category) {
            style("missing").yellow().to_string()
        } else if let Some((_, detail)) = verdict.failing.iter().find(|(c, _)| c == category) {
            match detail {
                Some(d) => format!("{} ({})", style("FAIL").red().bold(), d),
                None => style("FAIL").red().bold().to_string(),
            }
        } else {
            style("ok").green().to_string()
        };
        println!("  {:<8} {}", category, label);
    }
    println!();
    println!("{}", verdict.describe());

    if !verdict.passed() {
        anyhow::bail!("Verification failed");
    }
    Ok(())
}

pub fn cmd_evidence_record(
    config: &PhaseloopConfig,
    category: EvidenceCategory,
    passed: bool,
    detail: Option<String>,
) -> Result<()> {
    let store = EvidenceStore::new(config.evidence_file());
    store.record(category, passed, detail, Utc::now())?;
    println!(
        "Recorded {} evidence: {}",
        category,
        if passed { "passed" } else { "failed" }
    );
    Ok(())
}
