//! Configuration view and validation commands: `phaseloop config`.

use anyhow::{Context, Result};

use phaseloop::phaseloop_config::{PhaseloopConfig, PhaseloopToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &PhaseloopConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No phaseloop.toml found; showing defaults.");
            }
            println!();
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            println!("{}", rendered);
            println!("Worker id: {}", config.worker_id());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("phaseloop.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&config.state_dir)?;
            PhaseloopToml::default().save(&config_path)?;
            println!("Created phaseloop.toml at {}", config_path.display());
        }
    }

    Ok(())
}
