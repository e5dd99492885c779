//! Ensemble survey — `colarun check`.

use anyhow::Result;
use std::path::Path;

use colarun::config::Config;
use colarun::oracle::CompletionOracle;
use colarun::survey::{full_survey, quick_survey, write_missing};

pub fn cmd_check(config: &Config, quick: bool, output: Option<&Path>) -> Result<()> {
    let toml = config.toml();
    let grid = toml.sweep_grid()?;
    let ensemble = toml.ensemble()?;
    // Any index works as a template; the survey retargets it per configuration
    let base = toml.job_context(1, &config.job_id())?;
    let resolver = toml.resolver(&config.project_dir)?;

    let report = if quick {
        quick_survey(&resolver, &grid, &base, &ensemble)?
    } else {
        let oracle = CompletionOracle::new(std::sync::Arc::new(resolver));
        full_survey(&oracle, &grid, &base, &ensemble)
    };

    match output {
        Some(path) => {
            write_missing(path, &report)?;
            eprintln!("Missing list written to {}", path.display());
        }
        None => print!("{}", report.to_lines()),
    }

    let summary = format!(
        "{} of {} configurations incomplete ({} survey)",
        report.missing.len(),
        report.surveyed,
        if quick { "quick" } else { "full" }
    );
    if report.is_complete() {
        eprintln!("{}", console::style(summary).green());
    } else {
        eprintln!("{}", console::style(summary).yellow());
    }
    Ok(())
}
