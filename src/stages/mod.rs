//! Stage executors for one sweep cell.
//!
//! | Module         | Stage                                              |
//! |----------------|----------------------------------------------------|
//! | `eigenmodes`   | Laplacian eigenmodes per flavour and spatial shift |
//! | `propagators`  | quark propagators per flavour                      |
//! | `correlators`  | correlators per sink kind and structure            |
//!
//! `launcher` starts the solver binaries and `inputs` writes what they read.

pub mod correlators;
pub mod eigenmodes;
pub mod inputs;
pub mod launcher;
pub mod propagators;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::{Cell, JobContext, Stage};
use crate::lattice::Flavour;
use crate::paths::PathResolver;
use crate::timer::CheckpointTimer;

pub use correlators::CorrelatorStage;
pub use eigenmodes::EigenmodeStage;
pub use inputs::{InputWriter, SummaryInputWriter};
pub use launcher::{DRY_RUN, LaunchOutcome, LaunchRequest, RunFunction, SolverBinary, SolverLauncher};
pub use propagators::PropagatorStage;

/// Runs one pipeline stage for one cell and reports the artifacts it
/// produced or found already present.
#[async_trait]
pub trait StageExecutor: Send {
    fn stage(&self) -> Stage;

    async fn execute(
        &mut self,
        ctx: &JobContext,
        cell: &Cell,
        timer: &mut CheckpointTimer,
    ) -> Result<Vec<PathBuf>>;
}

/// The three executors driven by the sweep, in run order.
pub struct Stages {
    pub eigenmodes: Box<dyn StageExecutor>,
    pub propagators: Box<dyn StageExecutor>,
    pub correlators: Box<dyn StageExecutor>,
}

impl Stages {
    /// Executors backed by the configured solver binaries.
    pub fn solver_backed(env: Arc<SolverEnv>, settings: &SolverSettings) -> Self {
        Self {
            eigenmodes: Box::new(EigenmodeStage::new(env.clone(), settings.eigenmodes.clone())),
            propagators: Box::new(PropagatorStage::new(env.clone(), settings.propagators.clone())),
            correlators: Box::new(CorrelatorStage::new(env, settings.correlators.clone())),
        }
    }
}

/// Collaborators shared by the solver-backed executors.
pub struct SolverEnv {
    pub resolver: Arc<dyn PathResolver>,
    pub launcher: SolverLauncher,
    pub inputs: Arc<dyn InputWriter>,
}

/// `[solvers]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default)]
    pub run_function: RunFunction,
    /// MPI ranks per launch unless a binary overrides it
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default = "default_eigenmodes")]
    pub eigenmodes: SolverBinary,
    #[serde(default = "default_propagators")]
    pub propagators: SolverBinary,
    #[serde(default = "default_correlators")]
    pub correlators: SolverBinary,
}

fn default_workers() -> u32 {
    2
}

fn default_eigenmodes() -> SolverBinary {
    SolverBinary::new("lapmodes")
}

fn default_propagators() -> SolverBinary {
    SolverBinary {
        args: vec!["--solver=CGNE+S".to_string(), "--itermax=1000000".to_string()],
        ..SolverBinary::new("quarkprop")
    }
}

fn default_correlators() -> SolverBinary {
    SolverBinary::new("cfgen")
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            run_function: RunFunction::default(),
            workers: default_workers(),
            eigenmodes: default_eigenmodes(),
            propagators: default_propagators(),
            correlators: default_correlators(),
        }
    }
}

impl SolverSettings {
    pub fn launcher(&self) -> SolverLauncher {
        SolverLauncher::new(self.run_function, self.workers)
    }

    /// Replace every executable with the dry-run marker.
    pub fn dry_run(mut self) -> Self {
        for binary in [&mut self.eigenmodes, &mut self.propagators, &mut self.correlators] {
            binary.executable = DRY_RUN.to_string();
        }
        self
    }
}

/// Distinct flavours across every structure, in first-seen order.
pub(crate) fn flavours(ctx: &JobContext) -> Vec<Flavour> {
    let mut seen = Vec::new();
    for structure in &ctx.structures {
        for &flavour in structure.flavours() {
            if !seen.contains(&flavour) {
                seen.push(flavour);
            }
        }
    }
    seen
}

/// Background-field code understood by the solvers.
pub(crate) fn field_code(kd: i32) -> String {
    format!("[B:k={}]", kd)
}

/// Kappa as the solvers expect it, e.g. `13770` becomes `0.13770`.
pub(crate) fn format_kappa(kappa: u32) -> String {
    format!("0.{}", kappa)
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// A solver returned success but its output file is missing.
pub(crate) fn warn_if_missing(outcome: &LaunchOutcome, path: &Path) {
    if matches!(outcome, LaunchOutcome::Completed { .. }) && !path.exists() {
        tracing::warn!(
            expected = %path.display(),
            report = %outcome.report().display(),
            "Solver succeeded but did not write its output"
        );
    }
}
