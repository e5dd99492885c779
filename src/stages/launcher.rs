//! Spawning external solver binaries.
//!
//! Solvers read their input filestub from stdin and write progress to
//! stdout/stderr, which is captured into a per-launch report file. The
//! reserved executable name `dryRun` skips the launch entirely.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::StageError;
use crate::timer::{CheckpointTimer, format_duration};

/// Executable name that turns a launch into a no-op.
pub const DRY_RUN: &str = "dryRun";

/// How solver processes are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunFunction {
    #[default]
    Mpirun,
    Srun,
    /// Run the executable directly without an MPI launcher
    Direct,
}

impl std::fmt::Display for RunFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFunction::Mpirun => write!(f, "mpirun"),
            RunFunction::Srun => write!(f, "srun"),
            RunFunction::Direct => write!(f, "direct"),
        }
    }
}

/// One solver binary and how to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverBinary {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides `solvers.workers` for this binary
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SolverBinary {
    pub fn new(executable: &str) -> Self {
        Self {
            executable: executable.to_string(),
            args: Vec::new(),
            workers: None,
            timeout_secs: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.executable == DRY_RUN
    }
}

pub struct LaunchRequest<'a> {
    pub binary: &'a SolverBinary,
    /// Sent to the solver on stdin, followed by a newline
    pub filestub: &'a Path,
    pub report: &'a Path,
    /// Timer accumulating the solver's wall time
    pub timer_label: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Completed { report: PathBuf },
    DryRun { report: PathBuf },
}

impl LaunchOutcome {
    pub fn report(&self) -> &Path {
        match self {
            LaunchOutcome::Completed { report } | LaunchOutcome::DryRun { report } => report,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverLauncher {
    run_function: RunFunction,
    workers: u32,
}

impl SolverLauncher {
    pub fn new(run_function: RunFunction, workers: u32) -> Self {
        Self {
            run_function,
            workers: workers.max(1),
        }
    }

    /// Program and argument list for `binary`.
    pub fn command_line(&self, binary: &SolverBinary) -> (String, Vec<String>) {
        let workers = binary.workers.unwrap_or(self.workers).to_string();
        let mut args = Vec::new();
        let program = match self.run_function {
            RunFunction::Mpirun => {
                args.extend(["-np".to_string(), workers, binary.executable.clone()]);
                "mpirun".to_string()
            }
            RunFunction::Srun => {
                args.extend(["-n".to_string(), workers, binary.executable.clone()]);
                "srun".to_string()
            }
            RunFunction::Direct => binary.executable.clone(),
        };
        args.extend(binary.args.iter().cloned());
        (program, args)
    }

    pub async fn launch(
        &self,
        request: &LaunchRequest<'_>,
        timer: &mut CheckpointTimer,
    ) -> Result<LaunchOutcome, StageError> {
        let binary = request.binary;
        if binary.is_dry_run() {
            tracing::info!(
                filestub = %request.filestub.display(),
                report = %request.report.display(),
                "Dry run, solver not launched"
            );
            return Ok(LaunchOutcome::DryRun {
                report: request.report.to_path_buf(),
            });
        }

        if let Some(parent) = request.report.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StageError::ReportWriteFailed {
                path: request.report.to_path_buf(),
                source,
            })?;
        }

        let (program, args) = self.command_line(binary);
        tracing::info!(
            executable = %binary.executable,
            launcher = %self.run_function,
            workers = binary.workers.unwrap_or(self.workers),
            filestub = %request.filestub.display(),
            "Launching solver"
        );

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::SpawnFailed {
                executable: binary.executable.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{}\n", request.filestub.display());
            if let Err(e) = stdin.write_all(line.as_bytes()).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(StageError::Other(
                    anyhow::Error::new(e).context("Failed to write filestub to solver stdin"),
                ));
            }
        }

        if let Some(label) = request.timer_label {
            timer.start(label);
        }
        let started = Instant::now();

        let waited = match binary.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), child.wait_with_output())
                .await
                .ok(),
            None => Some(child.wait_with_output().await),
        };

        if let Some(label) = request.timer_label {
            timer.stop(label)?;
        }

        let output = match waited {
            Some(result) => result.map_err(|e| {
                StageError::Other(anyhow::Error::new(e).context("Failed to wait for solver"))
            })?,
            None => {
                return Err(StageError::TimedOut {
                    executable: binary.executable.clone(),
                    secs: binary.timeout_secs.unwrap_or_default(),
                });
            }
        };

        let mut report = output.stdout;
        report.extend_from_slice(&output.stderr);
        std::fs::write(request.report, report).map_err(|source| StageError::ReportWriteFailed {
            path: request.report.to_path_buf(),
            source,
        })?;

        if !output.status.success() {
            return Err(StageError::NonZeroExit {
                executable: binary.executable.clone(),
                code: output.status.code().unwrap_or(-1),
                report: request.report.to_path_buf(),
            });
        }

        tracing::info!(
            executable = %binary.executable,
            elapsed = %format_duration(started.elapsed()),
            report = %request.report.display(),
            "Solver finished"
        );
        Ok(LaunchOutcome::Completed {
            report: request.report.to_path_buf(),
        })
    }
}
