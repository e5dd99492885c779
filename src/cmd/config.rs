//! Configuration view and validation commands — `colarun config`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use colarun::config::Config;
use colarun::run_config::ColarunToml;

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config_override: Option<PathBuf>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = Config::new(project_dir.to_path_buf(), false, config_override)?;

            println!();
            println!("Colarun Configuration");
            println!("=====================");
            println!();
            if config.config_path.exists() {
                println!("Config file: {}", config.config_path.display());
            } else {
                println!("No colarun.toml found at {}", config.config_path.display());
                println!("Using default configuration:");
            }
            println!();

            let rendered = toml::to_string_pretty(config.toml())
                .context("Failed to serialize configuration")?;
            println!("{}", rendered);

            if let Ok(ensemble) = config.toml().ensemble() {
                println!(
                    "Ensemble: {} .. {} ({} configurations, {} chain(s))",
                    ensemble.config_id(1),
                    ensemble.config_id(ensemble.size),
                    ensemble.size,
                    ensemble.stride
                );
            }
            if !config.config_path.exists() {
                println!();
                println!("Run 'colarun config init' to create a colarun.toml file.");
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::new(project_dir.to_path_buf(), false, config_override)?;
            if !config.config_path.exists() {
                println!("No colarun.toml found. Checking defaults.");
            }

            let warnings = config.toml().validate();
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
            let project_dir = project_dir
                .canonicalize()
                .context("Failed to resolve project directory")?;
            let config_path = match config_override {
                Some(path) if path.is_absolute() => path,
                Some(path) => project_dir.join(path),
                None => colarun::config::colarun_dir(&project_dir)
                    .join(colarun::run_config::CONFIG_FILE),
            };

            if config_path.exists() {
                println!("colarun.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            ColarunToml::default().save(&config_path)?;

            println!("Created colarun.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [run] kappa, shifts, kds, structures, pairs, stage switches");
            println!("  - [ensemble] run_prefix, start, size, simultaneous_jobs");
            println!("  - [sinks], [solvers], [directories], [archive], [scheduler]");
            println!();
        }
    }

    Ok(())
}
