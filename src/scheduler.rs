//! Batch-scheduler submission.
//!
//! Jobs enqueue their successor through a `Scheduler`. The configuration
//! index reaches the new job through the `COLARUN_NTH_CONFIG` environment
//! variable.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;

use crate::errors::SchedulerError;

/// Environment variable carrying the configuration index into a submitted job.
pub const NTH_CONFIG_ENV: &str = "COLARUN_NTH_CONFIG";

const NTH_PLACEHOLDER: &str = "{nth}";

static JOB_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub nth: u32,
    /// Scheduler job id, when the scheduler printed one
    pub job_id: Option<String>,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn submit(&self, nth: u32) -> Result<Submission, SchedulerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Slurm,
    Pbs,
    /// User-supplied command line with `{nth}` placeholders
    Command,
    /// Log submissions only
    DryRun,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default)]
    pub kind: SchedulerKind,
    /// Job script submitted for slurm and pbs
    #[serde(default)]
    pub runscript: Option<String>,
    /// Extra arguments placed before the job script
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Full command line for `kind = "command"`
    #[serde(default)]
    pub command: Vec<String>,
}

impl SchedulerSettings {
    pub fn build(&self) -> Result<Box<dyn Scheduler>, SchedulerError> {
        let runscript = || {
            self.runscript.clone().ok_or_else(|| {
                SchedulerError::NotConfigured("scheduler.runscript is not set".to_string())
            })
        };
        Ok(match self.kind {
            SchedulerKind::Slurm => Box::new(CommandScheduler::slurm(&runscript()?, &self.extra_args)),
            SchedulerKind::Pbs => Box::new(CommandScheduler::pbs(&runscript()?, &self.extra_args)),
            SchedulerKind::Command => Box::new(CommandScheduler::custom(self.command.clone())?),
            SchedulerKind::DryRun => Box::new(DryRunScheduler),
        })
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match self.kind {
            SchedulerKind::Slurm | SchedulerKind::Pbs if self.runscript.is_none() => {
                warnings.push("scheduler.runscript is not set; chained submission will fail".to_string());
            }
            SchedulerKind::Command if self.command.is_empty() => {
                warnings.push("scheduler.command is empty".to_string());
            }
            SchedulerKind::Command if !self.command.iter().any(|a| a.contains(NTH_PLACEHOLDER)) => {
                warnings.push(format!(
                    "scheduler.command has no {} placeholder; the index only reaches the job via {}",
                    NTH_PLACEHOLDER, NTH_CONFIG_ENV
                ));
            }
            _ => {}
        }
        warnings
    }
}

/// Submits by running a command line, e.g. `sbatch` or `qsub`.
#[derive(Debug, Clone)]
pub struct CommandScheduler {
    program: String,
    args: Vec<String>,
}

impl CommandScheduler {
    pub fn slurm(runscript: &str, extra_args: &[String]) -> Self {
        let mut args = extra_args.to_vec();
        args.push(format!("--export=ALL,{}={}", NTH_CONFIG_ENV, NTH_PLACEHOLDER));
        args.push(runscript.to_string());
        Self {
            program: "sbatch".to_string(),
            args,
        }
    }

    pub fn pbs(runscript: &str, extra_args: &[String]) -> Self {
        let mut args = extra_args.to_vec();
        args.push("-v".to_string());
        args.push(format!("{}={}", NTH_CONFIG_ENV, NTH_PLACEHOLDER));
        args.push(runscript.to_string());
        Self {
            program: "qsub".to_string(),
            args,
        }
    }

    pub fn custom(command: Vec<String>) -> Result<Self, SchedulerError> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| SchedulerError::NotConfigured("scheduler.command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Arguments with `{nth}` substituted.
    pub fn args_for(&self, nth: u32) -> Vec<String> {
        let nth = nth.to_string();
        self.args
            .iter()
            .map(|a| a.replace(NTH_PLACEHOLDER, &nth))
            .collect()
    }

    fn display(&self, nth: u32) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args_for(nth))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Scheduler for CommandScheduler {
    async fn submit(&self, nth: u32) -> Result<Submission, SchedulerError> {
        let command = self.display(nth);
        tracing::debug!(command = %command, "Submitting job");

        let output = Command::new(&self.program)
            .args(self.args_for(nth))
            .env(NTH_CONFIG_ENV, nth.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| SchedulerError::SpawnFailed {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SchedulerError::Rejected {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let job_id = extract_job_id(&String::from_utf8_lossy(&output.stdout));
        tracing::info!(
            nth,
            job_id = job_id.as_deref().unwrap_or("unknown"),
            "Submitted job"
        );
        Ok(Submission { nth, job_id })
    }
}

/// Logs what would be submitted.
#[derive(Debug, Clone, Default)]
pub struct DryRunScheduler;

#[async_trait]
impl Scheduler for DryRunScheduler {
    async fn submit(&self, nth: u32) -> Result<Submission, SchedulerError> {
        tracing::info!(nth, "Dry run: would submit configuration");
        Ok(Submission { nth, job_id: None })
    }
}

/// First run of digits in scheduler output, e.g. `Submitted batch job 81723`.
pub fn extract_job_id(stdout: &str) -> Option<String> {
    JOB_ID_REGEX.find(stdout).map(|m| m.as_str().to_string())
}
