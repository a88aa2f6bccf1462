//! `phaseloop init`: create the state directory in a project.
//!
//! ```text
//! .phaseloop/
//! ├── phaseloop.toml   # Defaults, written once
//! ├── archive/         # Finished sessions
//! ├── logs/            # Tracing output
//! └── queue/           # Shared backlog (multi-worker mode)
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::phaseloop_config::{PHASELOOP_DIR, PhaseloopToml};

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    pub state_dir: PathBuf,
    /// False when `.phaseloop/` already existed
    pub created: bool,
    /// True when `phaseloop.toml` was written by this call
    pub wrote_config: bool,
}

/// Create (or complete) the `.phaseloop/` structure. Existing files are
/// never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let state_dir = project_dir.join(PHASELOOP_DIR);
    let created = !state_dir.exists();

    for dir in [
        state_dir.clone(),
        state_dir.join("archive"),
        state_dir.join("logs"),
        state_dir.join("queue"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_file = state_dir.join("phaseloop.toml");
    let wrote_config = !config_file.exists();
    if wrote_config {
        PhaseloopToml::default().save(&config_file)?;
    }

    Ok(InitResult {
        state_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(PHASELOOP_DIR).exists()
}
