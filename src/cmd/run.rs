//! One job's worth of work — `colarun run` and `colarun submit`.

use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::info;

use colarun::archive::ArchivalService;
use colarun::config::Config;
use colarun::orchestrator::{ChainSubmitter, StateManager, SweepController, SweepReport};
use colarun::paths::PathResolver;
use colarun::scheduler::{DryRunScheduler, Scheduler};
use colarun::stages::{SolverEnv, Stages, SummaryInputWriter};
use colarun::timer::CheckpointTimer;

fn scheduler_for(config: &Config, dry_run: bool) -> Result<Box<dyn Scheduler>> {
    if dry_run {
        return Ok(Box::new(DryRunScheduler));
    }
    Ok(config.toml().scheduler.build()?)
}

pub async fn cmd_run(
    config: &Config,
    nth_config: Option<u32>,
    no_chain: bool,
    dry_run: bool,
) -> Result<()> {
    let toml = config.toml();
    let nth = config.nth_config(nth_config)?;
    let job_id = config.job_id();
    let ctx = toml.job_context(nth, &job_id)?;
    let grid = toml.sweep_grid()?;
    let ensemble = toml.ensemble()?;
    config.ensure_directories()?;

    for warning in toml.validate() {
        tracing::warn!("{}", warning);
    }

    let resolver: Arc<dyn PathResolver> = Arc::new(toml.resolver(&config.project_dir)?);
    let solvers = if dry_run {
        toml.solvers.clone().dry_run()
    } else {
        toml.solvers.clone()
    };
    let env = Arc::new(SolverEnv {
        resolver: resolver.clone(),
        launcher: solvers.launcher(),
        inputs: Arc::new(SummaryInputWriter),
    });
    let stages = Stages::solver_backed(env, &solvers);
    let mut controller =
        SweepController::new(resolver, ArchivalService::new(toml.lock_policy()), stages)
            .with_state(StateManager::new(config.state_file.clone()));

    info!(
        cfg = %ctx.config_id,
        nth,
        job = %job_id,
        cells = grid.len(),
        "Starting sweep"
    );
    let mut timer = CheckpointTimer::for_pipeline();
    let report = controller.run(&grid, &ctx, &mut timer).await?;
    print_summary(&ctx.config_id.to_string(), &report);

    if no_chain {
        return Ok(());
    }

    let scheduler = scheduler_for(config, dry_run)?;
    match ChainSubmitter::new(controller.oracle(), scheduler.as_ref())
        .submit_next(&grid, &ctx, &ensemble, nth)
        .await?
    {
        Some(next) => println!("Submitted configuration {} ({})", next, ensemble.config_id(next)),
        None => println!("No configurations left to submit"),
    }
    Ok(())
}

pub async fn cmd_submit(config: &Config, nth_config: u32, dry_run: bool) -> Result<()> {
    let ensemble = config.toml().ensemble()?;
    if !ensemble.contains(nth_config) {
        bail!(
            "Configuration index {} is outside the ensemble (1..={})",
            nth_config,
            ensemble.size
        );
    }

    let submission = scheduler_for(config, dry_run)?.submit(nth_config).await?;
    println!(
        "Submitted configuration {} ({}), job id {}",
        submission.nth,
        ensemble.config_id(submission.nth),
        submission.job_id.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

fn print_summary(cfg: &str, report: &SweepReport) {
    println!();
    println!("Sweep finished for {}", cfg);
    println!("  Cells run:      {}", report.cells_run.len());
    println!("  Cells skipped:  {}", report.cells_skipped.len());
    println!("  Files archived: {}", report.archived_members);
    for tar in &report.abandoned_archives {
        println!(
            "  {} {}",
            console::style("Archive busy, files left loose:").yellow(),
            tar.display()
        );
    }
    if !report.retained.is_empty() {
        println!(
            "  Kept on disk:   {} propagator(s), {} eigenmode file(s)",
            report.retained.propagators.len(),
            report.retained.eigenmodes.len()
        );
    }
    println!();
}
