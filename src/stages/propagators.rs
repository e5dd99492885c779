//! Quark propagator generation.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::{
    LaunchRequest, SolverBinary, SolverEnv, StageExecutor, ensure_parent, field_code, flavours,
    format_kappa, warn_if_missing,
};
use crate::context::{Cell, JobContext, Stage};
use crate::timer::{CheckpointTimer, HEAVY_PROPAGATORS, LIGHT_PROPAGATORS};

pub struct PropagatorStage {
    env: Arc<SolverEnv>,
    binary: SolverBinary,
}

impl PropagatorStage {
    pub fn new(env: Arc<SolverEnv>, binary: SolverBinary) -> Self {
        Self { env, binary }
    }
}

#[async_trait]
impl StageExecutor for PropagatorStage {
    fn stage(&self) -> Stage {
        Stage::Propagators
    }

    async fn execute(
        &mut self,
        ctx: &JobContext,
        cell: &Cell,
        timer: &mut CheckpointTimer,
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for flavour in flavours(ctx) {
            let path = self.env.resolver.propagator_file(ctx, cell, flavour);
            if files.contains(&path) {
                continue;
            }
            if path.exists() {
                tracing::info!(file = %path.display(), "Propagator already exists, skipping");
                files.push(path);
                continue;
            }
            ensure_parent(&path)?;

            let (kappa, timer_label) = if flavour.is_heavy() {
                (ctx.strange_kappa, HEAVY_PROPAGATORS)
            } else {
                (ctx.kappa, LIGHT_PROPAGATORS)
            };
            let kd = cell.kd * flavour.charge();
            let tag = format!("{}_BF{}_sh{}", flavour, kd, cell.shift);
            let stub = self.env.resolver.input_stub(ctx, Stage::Propagators, &tag);

            let mut values = vec![
                ("configuration", ctx.config_id.to_string()),
                ("kappa", format_kappa(kappa)),
                ("field", field_code(kd)),
                ("shift", cell.shift.solver_format()),
                ("source_type", ctx.source.solver_code().to_string()),
            ];
            if ctx.source.needs_eigenmodes() {
                let modes = self.env.resolver.eigenmode_file(ctx, cell, flavour);
                values.push(("eigenmodes", modes.display().to_string()));
            }
            values.push(("output", path.display().to_string()));
            self.env.inputs.write_inputs(Stage::Propagators, &stub, &values)?;

            let report = self.env.resolver.report_file(ctx, Stage::Propagators, &tag);
            let outcome = self
                .env
                .launcher
                .launch(
                    &LaunchRequest {
                        binary: &self.binary,
                        filestub: &stub,
                        report: &report,
                        timer_label: Some(timer_label),
                    },
                    timer,
                )
                .await?;
            warn_if_missing(&outcome, &path);
            files.push(path);
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{Flavour, Structure};
    use crate::stages::tests::{env_in, failing_solver, touching_solver};
    use std::time::Duration;
    use tempfile::tempdir;

    fn cell(kd: i32) -> Cell {
        Cell::new(kd, "x16t08".parse().unwrap())
    }

    #[tokio::test]
    async fn test_light_and_heavy_timers_accumulate() {
        let dir = tempdir().unwrap();
        let ctx = crate::paths::tests::sample_context();
        let mut stage = PropagatorStage::new(env_in(&dir), touching_solver(Stage::Propagators));
        let mut timer = CheckpointTimer::for_pipeline();

        let files = stage.execute(&ctx, &cell(1), &mut timer).await.unwrap();

        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.exists()));
        assert!(timer.live_value(LIGHT_PROPAGATORS).unwrap() > Duration::ZERO);
        assert!(timer.live_value(HEAVY_PROPAGATORS).unwrap() > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_existing_propagators_skip_the_solver() {
        let dir = tempdir().unwrap();
        let env = env_in(&dir);
        let ctx = crate::paths::tests::sample_context();
        let mut timer = CheckpointTimer::for_pipeline();

        PropagatorStage::new(env.clone(), touching_solver(Stage::Propagators))
            .execute(&ctx, &cell(1), &mut timer)
            .await
            .unwrap();
        let again = PropagatorStage::new(env, failing_solver())
            .execute(&ctx, &cell(1), &mut timer)
            .await
            .unwrap();
        assert_eq!(again.len(), 3);
    }

    #[tokio::test]
    async fn test_zero_field_shares_neutral_propagators() {
        let dir = tempdir().unwrap();
        let mut ctx = crate::paths::tests::sample_context();
        // At zero field the u and d propagators are the same file
        ctx.structures = vec![Structure::new(vec![Flavour::U, Flavour::D]).unwrap()];
        let mut stage = PropagatorStage::new(env_in(&dir), touching_solver(Stage::Propagators));
        let mut timer = CheckpointTimer::for_pipeline();

        let files = stage.execute(&ctx, &cell(0), &mut timer).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_returns_paths_without_files() {
        let dir = tempdir().unwrap();
        let ctx = crate::paths::tests::sample_context();
        let mut stage = PropagatorStage::new(env_in(&dir), SolverBinary::new(crate::stages::DRY_RUN));
        let mut timer = CheckpointTimer::for_pipeline();

        let files = stage.execute(&ctx, &cell(1), &mut timer).await.unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| !f.exists()));
    }
}
