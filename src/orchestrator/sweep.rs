//! Shift by field-strength sweep for one configuration.
//!
//! Shifts form the outer loop so that propagators and eigenmodes can be
//! cleaned up as soon as the last field strength of a shift is done.
//! Eigenmodes depend only on the spatial part of the shift and survive into
//! the next shift when that part does not change.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::archive::{ArchivalService, ArchiveOutcome};
use crate::context::{ArtifactSet, Cell, JobContext, SweepGrid};
use crate::oracle::CompletionOracle;
use crate::orchestrator::state::{CellStatus, StateManager};
use crate::paths::PathResolver;
use crate::stages::Stages;
use crate::timer::CheckpointTimer;

/// What a sweep did, for the caller's summary.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub cells_run: Vec<Cell>,
    pub cells_skipped: Vec<Cell>,
    /// Correlator files moved into archives
    pub archived_members: usize,
    /// Archives left alone because another job held their lock
    pub abandoned_archives: Vec<PathBuf>,
    /// Intermediate artifacts still on disk when the sweep finished
    pub retained: ArtifactSet,
}

pub struct SweepController {
    oracle: CompletionOracle,
    archiver: ArchivalService,
    resolver: Arc<dyn PathResolver>,
    stages: Stages,
    state: Option<StateManager>,
}

impl SweepController {
    pub fn new(
        resolver: Arc<dyn PathResolver>,
        archiver: ArchivalService,
        stages: Stages,
    ) -> Self {
        Self {
            oracle: CompletionOracle::new(resolver.clone()),
            archiver,
            resolver,
            stages,
            state: None,
        }
    }

    /// Record every cell transition in `state`.
    pub fn with_state(mut self, state: StateManager) -> Self {
        self.state = Some(state);
        self
    }

    pub fn oracle(&self) -> &CompletionOracle {
        &self.oracle
    }

    pub async fn run(
        &mut self,
        grid: &SweepGrid,
        ctx: &JobContext,
        timer: &mut CheckpointTimer,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut carried_eigenmodes = Vec::new();

        for (shift, next) in grid.with_lookahead() {
            let mut artifacts = ArtifactSet::default();
            artifacts.record_eigenmodes(std::mem::take(&mut carried_eigenmodes));

            for &kd in grid.kds() {
                let cell = Cell::new(kd, shift.clone());

                if self.oracle.is_complete(ctx, grid, Some(kd), Some(shift)) {
                    info!(
                        cfg = %ctx.config_id,
                        kd,
                        shift = %shift,
                        "Correlators already exist, skipping cell"
                    );
                    self.record(ctx, &cell, CellStatus::Skipped);
                    report.cells_skipped.push(cell);
                    continue;
                }

                info!(cfg = %ctx.config_id, kd, shift = %shift, "Starting cell");
                self.record(ctx, &cell, CellStatus::Started);
                if let Err(e) = self
                    .run_cell(ctx, &cell, &mut artifacts, &mut report, timer)
                    .await
                {
                    self.record(ctx, &cell, CellStatus::Failed);
                    return Err(e.context(format!("Cell kd={} shift={} failed", kd, shift)));
                }
                self.record(ctx, &cell, CellStatus::Completed);
                report.cells_run.push(cell);
            }

            if ctx.flags.make_props && !ctx.flags.keep_props {
                delete_artifacts("propagator", &artifacts.propagators);
                artifacts.propagators.clear();
            }

            if ctx.flags.make_emodes && !ctx.flags.keep_emodes {
                if shift.spatially_equivalent(next) {
                    info!(
                        shift = %shift,
                        files = artifacts.eigenmodes.len(),
                        "Next shift is spatially equivalent, keeping eigenmodes"
                    );
                    carried_eigenmodes = std::mem::take(&mut artifacts.eigenmodes);
                } else {
                    delete_artifacts("eigenmode", &artifacts.eigenmodes);
                    artifacts.eigenmodes.clear();
                }
            }

            report.retained.record_propagators(artifacts.propagators);
            report.retained.record_eigenmodes(artifacts.eigenmodes);
            timer.write_full_report(next.is_none());
        }

        Ok(report)
    }

    async fn run_cell(
        &mut self,
        ctx: &JobContext,
        cell: &Cell,
        artifacts: &mut ArtifactSet,
        report: &mut SweepReport,
        timer: &mut CheckpointTimer,
    ) -> Result<()> {
        let label = cell.checkpoint_label();
        timer.create_checkpoint(&label, None);
        let result = self.run_stages(ctx, cell, artifacts, report, timer).await;
        timer.write_checkpoint(&label, true)?;
        result
    }

    async fn run_stages(
        &mut self,
        ctx: &JobContext,
        cell: &Cell,
        artifacts: &mut ArtifactSet,
        report: &mut SweepReport,
        timer: &mut CheckpointTimer,
    ) -> Result<()> {
        if ctx.flags.make_emodes {
            let files = self.stages.eigenmodes.execute(ctx, cell, timer).await?;
            artifacts.record_eigenmodes(files);
        }
        if ctx.flags.make_props {
            let files = self.stages.propagators.execute(ctx, cell, timer).await?;
            artifacts.record_propagators(files);
        }
        if ctx.flags.make_cfuns {
            self.stages.correlators.execute(ctx, cell, timer).await?;
            if ctx.flags.tar_cfuns {
                self.archive_cell(ctx, cell, report)?;
            }
        }
        Ok(())
    }

    /// Fold this cell's loose correlators into their archives.
    fn archive_cell(&self, ctx: &JobContext, cell: &Cell, report: &mut SweepReport) -> Result<()> {
        for sink in &ctx.sinks {
            for structure in &ctx.structures {
                for pair in ctx.pairs.iter().filter(|p| !p.is_vanishing(cell.kd)) {
                    let pattern = self.resolver.correlator_glob(ctx, cell, sink, pair, structure);
                    let mut candidates = Vec::new();
                    for entry in glob::glob(&pattern)
                        .with_context(|| format!("Invalid correlator pattern {}", pattern))?
                    {
                        match entry {
                            Ok(path) => candidates.push(path),
                            Err(e) => warn!(error = %e, "Unreadable correlator, not archived"),
                        }
                    }

                    let tar = self
                        .resolver
                        .archive_file(ctx, cell.kd, sink.kind, pair, structure);
                    match self
                        .archiver
                        .archive(&tar, &candidates, cell.shift.label(), &ctx.config_id)?
                    {
                        ArchiveOutcome::Archived { members } => report.archived_members += members,
                        ArchiveOutcome::Abandoned { .. } => report.abandoned_archives.push(tar),
                        ArchiveOutcome::NothingToDo => {
                            info!(pattern = %pattern, "No loose correlators to archive");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn record(&self, ctx: &JobContext, cell: &Cell, status: CellStatus) {
        if let Some(state) = &self.state
            && let Err(e) = state.save(&ctx.config_id, cell, status)
        {
            warn!(error = %e, "Failed to record cell state");
        }
    }
}

/// Remove intermediate files; already-missing files are fine.
fn delete_artifacts(kind: &str, paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => info!(file = %path.display(), "Deleted {}", kind),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(file = %path.display(), error = %e, "Failed to delete {}", kind),
        }
    }
}
