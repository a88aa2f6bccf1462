//! `phaseloop hook`: one host invocation.
//!
//! stdout carries exactly one JSON response line; everything else goes to
//! stderr and the log file.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use phaseloop::clock::SystemClock;
use phaseloop::hook::HookInput;
use phaseloop::orchestrator::Orchestrator;
use phaseloop::phaseloop_config::PhaseloopConfig;
use phaseloop::session::FileSessionStore;

pub fn cmd_hook(
    config: &PhaseloopConfig,
    session_id: Option<String>,
    transcript: Option<PathBuf>,
) -> Result<()> {
    let input = if session_id.is_some() || transcript.is_some() {
        HookInput {
            session_id,
            transcript_path: transcript,
            ..Default::default()
        }
    } else {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read hook input from stdin")?;
        HookInput::parse(&raw)?
    };

    let store = FileSessionStore::new(
        config.session_file(),
        config.task_file(),
        config.archive_dir(),
    );
    let orchestrator = Orchestrator::new(&store, Arc::new(SystemClock), config);
    let decision = orchestrator.evaluate(&input)?;
    println!("{}", decision.to_json()?);
    Ok(())
}
