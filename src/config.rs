use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::run_config::{CONFIG_FILE, ColarunToml};
use crate::scheduler::NTH_CONFIG_ENV;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "COLARUN_CONFIG";

/// Job id variables in lookup order; array ids first so every task of an
/// array job shares one id.
const JOB_ID_VARS: [&str; 4] = ["SLURM_ARRAY_JOB_ID", "SLURM_JOB_ID", "PBS_ARRAYID", "PBS_JOBID"];

const DEFAULT_JOB_ID: &str = "1";

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Runtime configuration for colarun.
///
/// Bridges the on-disk `ColarunToml` with the environment the batch system
/// provides and the CLI overrides, and owns the `.colarun/` layout.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub colarun_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_file: PathBuf,
    pub verbose: bool,
    toml: ColarunToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool, config_path: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let colarun_dir = colarun_dir(&project_dir);
        let config_path = resolve_config_path(
            &project_dir,
            config_path,
            std::env::var(CONFIG_ENV).ok(),
        );
        let toml = ColarunToml::load_or_default(&config_path)?;

        Ok(Self {
            state_file: colarun_dir.join("state"),
            project_dir,
            colarun_dir,
            config_path,
            verbose,
            toml,
        })
    }

    pub fn toml(&self) -> &ColarunToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.colarun_dir).context("Failed to create .colarun directory")?;
        Ok(())
    }

    /// Scheduler job id of the current process.
    pub fn job_id(&self) -> String {
        job_id_from(|var| std::env::var(var).ok())
    }

    /// Configuration index from the CLI, else from the environment a chained
    /// submission sets.
    pub fn nth_config(&self, cli: Option<u32>) -> Result<u32> {
        nth_config_from(cli, std::env::var(NTH_CONFIG_ENV).ok())
    }
}

/// `.colarun/` under the project directory.
pub fn colarun_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".colarun")
}

fn resolve_config_path(project_dir: &Path, cli: Option<PathBuf>, env: Option<String>) -> PathBuf {
    let path = cli
        .or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| colarun_dir(project_dir).join(CONFIG_FILE));
    if path.is_absolute() {
        path
    } else {
        project_dir.join(path)
    }
}

fn job_id_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    JOB_ID_VARS
        .iter()
        .filter_map(|var| lookup(var))
        .find_map(|value| DIGITS.find(&value).map(|m| m.as_str().to_string()))
        .unwrap_or_else(|| DEFAULT_JOB_ID.to_string())
}

fn nth_config_from(cli: Option<u32>, env: Option<String>) -> Result<u32> {
    if let Some(nth) = cli {
        return Ok(nth);
    }
    let value = env.ok_or_else(|| {
        anyhow!(
            "No configuration index given; pass --nth-config or set {}",
            NTH_CONFIG_ENV
        )
    })?;
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value '{}'", NTH_CONFIG_ENV, value))
}
