//! `phaseloop audit`: print the decision trail.

use anyhow::Result;
use console::style;

use phaseloop::audit::{AuditKind, AuditLogger};
use phaseloop::phaseloop_config::PhaseloopConfig;

pub fn cmd_audit(config: &PhaseloopConfig, limit: usize, json: bool) -> Result<()> {
    let events = AuditLogger::new(&config.audit_file()).tail(limit)?;
    if events.is_empty() {
        println!("No audit events recorded.");
        return Ok(());
    }

    for event in &events {
        if json {
            println!("{}", serde_json::to_string(event)?);
            continue;
        }
        let position = match (event.phase, event.iteration) {
            (Some(phase), Some(iteration)) => format!("{} #{}", phase, iteration),
            _ => String::new(),
        };
        let summary = match &event.kind {
            AuditKind::SessionStarted { tier, ceiling } => {
                format!("session started ({}, ceiling {})", tier, ceiling)
            }
            AuditKind::Blocked => "blocked".to_string(),
            AuditKind::Transitioned { from, to, sentinel } => {
                format!("{} -> {} on {}", from, to, sentinel)
            }
            AuditKind::GatePassed => style("gate passed").green().to_string(),
            AuditKind::GateFailed { missing, failing } => format!(
                "{} missing [{}] failing [{}]",
                style("gate failed").red(),
                missing.join(", "),
                failing.join(", ")
            ),
            AuditKind::Halted { reason, .. } => format!("{} {}", style("halted").yellow(), reason),
            AuditKind::ForeignSession { host_session } => {
                format!("ignored host session {}", host_session)
            }
            AuditKind::CeilingRaised { from, to } => format!("ceiling {} -> {}", from, to),
            AuditKind::MarkerPlaced { marker } => format!("marker {} placed", marker),
        };
        println!(
            "{}  {:<14} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            position,
            summary
        );
    }
    Ok(())
}
