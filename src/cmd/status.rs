//! Run-state log commands — `colarun status` and `colarun reset`.

use anyhow::Result;
use std::collections::HashSet;

use colarun::config::Config;
use colarun::orchestrator::{CellStatus, StateManager};

pub fn cmd_status(config: &Config, cfg: Option<&str>, recent: usize, json: bool) -> Result<()> {
    let state = StateManager::new(config.state_file.clone());
    let entries = match cfg {
        Some(cfg) => state.get_config_entries(cfg)?,
        None => state.get_entries()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!();
    println!("Colarun Status");
    println!("==============");
    println!();
    println!("Config file: {}", config.config_path.display());
    println!("State log:   {}", config.state_file.display());
    println!();

    if entries.is_empty() {
        println!("Execution: Not started");
        println!();
        println!("Run 'colarun run --nth-config 1' to start.");
        println!();
        return Ok(());
    }

    let configs: HashSet<&str> = entries.iter().map(|e| e.config_id.as_str()).collect();
    let count = |status: CellStatus| entries.iter().filter(|e| e.status == status).count();

    println!("Execution Progress:");
    println!("  Configurations touched: {}", configs.len());
    println!("  Cells completed:        {}", count(CellStatus::Completed));
    println!("  Cells skipped:          {}", count(CellStatus::Skipped));
    let failed = count(CellStatus::Failed);
    if failed > 0 {
        println!(
            "  Cells failed:           {}",
            console::style(failed).red()
        );
    }

    println!();
    println!("Recent activity:");
    for entry in entries.iter().rev().take(recent) {
        println!(
            "  {} kd={:<3} sh{:<12} {:<9} ({})",
            entry.config_id,
            entry.kd,
            entry.shift,
            entry.status,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    Ok(())
}

pub fn cmd_reset(config: &Config, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will clear the run-state log. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    StateManager::new(config.state_file.clone()).reset()?;
    println!("Reset complete");
    Ok(())
}
