//! Laplacian eigenmode generation.
//!
//! One eigenmode file per flavour, keyed by the flavour-scaled field strength
//! and the spatial part of the shift. Files already on disk (for example from
//! an earlier shift that differs only in time) are reused.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use super::{
    LaunchRequest, SolverBinary, SolverEnv, StageExecutor, ensure_parent, field_code, flavours,
    warn_if_missing,
};
use crate::context::{Cell, JobContext, Stage};
use crate::timer::{CheckpointTimer, EIGENMODES};

pub struct EigenmodeStage {
    env: Arc<SolverEnv>,
    binary: SolverBinary,
}

impl EigenmodeStage {
    pub fn new(env: Arc<SolverEnv>, binary: SolverBinary) -> Self {
        Self { env, binary }
    }
}

#[async_trait]
impl StageExecutor for EigenmodeStage {
    fn stage(&self) -> Stage {
        Stage::Eigenmodes
    }

    async fn execute(
        &mut self,
        ctx: &JobContext,
        cell: &Cell,
        timer: &mut CheckpointTimer,
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for flavour in flavours(ctx) {
            let path = self.env.resolver.eigenmode_file(ctx, cell, flavour);
            if path.exists() {
                tracing::info!(file = %path.display(), "Eigenmodes already exist, skipping");
                files.push(path);
                continue;
            }
            ensure_parent(&path)?;

            let kd = cell.kd * flavour.charge();
            let tag = format!("{}_BF{}_sh{}", flavour, kd, cell.shift.spatial_label());
            let stub = self.env.resolver.input_stub(ctx, Stage::Eigenmodes, &tag);
            self.env.inputs.write_inputs(
                Stage::Eigenmodes,
                &stub,
                &[
                    ("configuration", ctx.config_id.to_string()),
                    ("field", field_code(kd)),
                    ("shift", cell.shift.solver_format()),
                    ("output", path.display().to_string()),
                ],
            )?;

            let report = self.env.resolver.report_file(ctx, Stage::Eigenmodes, &tag);
            let outcome = self
                .env
                .launcher
                .launch(
                    &LaunchRequest {
                        binary: &self.binary,
                        filestub: &stub,
                        report: &report,
                        timer_label: Some(EIGENMODES),
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
