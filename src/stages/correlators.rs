//! Correlator generation.
//!
//! One solver call per (sink kind, structure) ties the cell's propagators up
//! into every particle pair at every sink value. Pairs that vanish at this
//! field strength are left out of the request.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::{LaunchRequest, SolverBinary, SolverEnv, StageExecutor, ensure_parent, field_code};
use crate::context::{Cell, JobContext, Stage};
use crate::lattice::SinkKind;
use crate::paths::CorrelatorKey;
use crate::timer::{CORRELATORS, CheckpointTimer};

pub struct CorrelatorStage {
    env: Arc<SolverEnv>,
    binary: SolverBinary,
}

impl CorrelatorStage {
    pub fn new(env: Arc<SolverEnv>, binary: SolverBinary) -> Self {
        Self { env, binary }
    }
}

#[async_trait]
impl StageExecutor for CorrelatorStage {
    fn stage(&self) -> Stage {
        Stage::Correlators
    }

    async fn execute(
        &mut self,
        ctx: &JobContext,
        cell: &Cell,
        timer: &mut CheckpointTimer,
    ) -> Result<Vec<PathBuf>> {
        let resolver = &self.env.resolver;
        let mut files = Vec::new();

        for sink in &ctx.sinks {
            for structure in &ctx.structures {
                let mut outputs = Vec::new();
                for pair in ctx.pairs.iter().filter(|p| !p.is_vanishing(cell.kd)) {
                    for &sink_value in &sink.values {
                        let key = CorrelatorKey {
                            cell,
                            sink,
                            sink_value,
                            pair,
                            structure,
                        };
                        outputs.push((pair, resolver.correlator_file(ctx, &key)));
                    }
                }
                if outputs.is_empty() {
                    continue;
                }

                let tag = format!(
                    "{}_{}_BF{}_sh{}",
                    sink.kind.tag(),
                    structure.label(),
                    cell.kd,
                    cell.shift
                );
                let stub = resolver.input_stub(ctx, Stage::Correlators, &tag);

                let mut values = vec![
                    ("configuration", ctx.config_id.to_string()),
                    ("field", field_code(cell.kd)),
                    ("shift", cell.shift.solver_format()),
                    ("sink_type", sink.kind.to_string()),
                    (
                        "sink_values",
                        sink.values
                            .iter()
                            .map(u32::to_string)
                            .collect::<Vec<_>>()
                            .join(" "),
                    ),
                    ("structure", structure.label()),
                ];
                for &flavour in structure.flavours() {
                    let prop = resolver.propagator_file(ctx, cell, flavour);
                    values.push(("propagator", prop.display().to_string()));
                    if sink.kind == SinkKind::Laplacian {
                        let modes = resolver.eigenmode_file(ctx, cell, flavour);
                        values.push(("eigenmodes", modes.display().to_string()));
                    }
                }
                for (pair, output) in &outputs {
                    ensure_parent(output)?;
                    values.push(("interpolators", format!("{} {}", pair.chi, pair.chibar)));
                    values.push(("output", output.display().to_string()));
                }
                self.env.inputs.write_inputs(Stage::Correlators, &stub, &values)?;

                let report = resolver.report_file(ctx, Stage::Correlators, &tag);
                self.env
                    .launcher
                    .launch(
                        &LaunchRequest {
                            binary: &self.binary,
                            filestub: &stub,
                            report: &report,
                            timer_label: Some(CORRELATORS),
                        },
                        timer,
                    )
                    .await?;

                files.extend(outputs.into_iter().map(|(_, path)| path));
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SweepGrid;
    use crate::lattice::{ParticlePair, SinkSpec};
    use crate::oracle::CompletionOracle;
    use crate::stages::tests::{env_in, failing_solver, touching_solver};
    use tempfile::tempdir;

    fn cell(kd: i32) -> Cell {
        Cell::new(kd, "x16t08".parse().unwrap())
    }

    #[tokio::test]
    async fn test_writes_every_sink_value_and_pair() {
        let dir = tempdir().unwrap();
        let env = env_in(&dir);
        let mut ctx = crate::paths::tests::sample_context();
        ctx.sinks = vec![SinkSpec {
            kind: crate::lattice::SinkKind::Smeared,
            values: vec![250, 400],
        }];
        ctx.pairs.push(ParticlePair::new("neutron_1", "neutron_1bar"));
        let mut stage = CorrelatorStage::new(env.clone(), touching_solver(Stage::Correlators));
        let mut timer = CheckpointTimer::for_pipeline();

        let files = stage.execute(&ctx, &cell(1), &mut timer).await.unwrap();
        assert_eq!(files.len(), 4);
        assert!(files.iter().all(|f| f.exists()));

        // The oracle now sees the cell as complete
        let grid = SweepGrid::new(vec![cell(1).shift], vec![1]).unwrap();
        let oracle = CompletionOracle::new(env.resolver.clone());
        assert!(oracle.is_complete(&ctx, &grid, None, None));
    }

    #[tokio::test]
    async fn test_vanishing_pairs_are_not_requested() {
        let dir = tempdir().unwrap();
        let mut ctx = crate::paths::tests::sample_context();
        ctx.pairs = vec![ParticlePair::new("lambda0_1", "sigma0_1bar")];
        // Nothing to compute, so even a failing solver is never called
        let mut stage = CorrelatorStage::new(env_in(&dir), failing_solver());
        let mut timer = CheckpointTimer::for_pipeline();

        let files = stage.execute(&ctx, &cell(0), &mut timer).await.unwrap();
        assert!(files.is_empty());
        assert!(stage.execute(&ctx, &cell(1), &mut timer).await.is_err());
    }
}
