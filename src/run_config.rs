//! On-disk run configuration read from `.colarun/colarun.toml`.
//!
//! Every section and field has a default, so an empty file describes a small
//! but complete run. Typed accessors turn the raw values into domain types
//! and fail on anything malformed; `validate` reports softer problems as
//! warnings.
//!
//! # Configuration File Format
//!
//! ```toml
//! [run]
//! kappa = 13770
//! strange_kappa = 13665
//! source = "sm"
//! shifts = ["x00t00", "x16t08"]
//! kds = [0, 1, -1, 2, -2]
//! structures = [["u", "d", "s"]]
//! pairs = [{ chi = "proton_1", chibar = "proton_1bar" }]
//! make_props = true
//! make_cfuns = true
//! tar_cfuns = true
//!
//! [ensemble]
//! run_prefix = "a"
//! start = 1880
//! size = 400
//! simultaneous_jobs = 4
//!
//! [sinks]
//! smeared = [250]
//! laplacian = [96]
//!
//! [solvers]
//! run_function = "mpirun"
//! workers = 64
//!
//! [solvers.propagators]
//! executable = "quarkprop"
//! args = ["--solver=CGNE+S"]
//!
//! [directories]
//! output = "/scratch/lattice/output/"
//!
//! [archive]
//! max_tries = 10
//! backoff_secs = 5
//!
//! [scheduler]
//! kind = "slurm"
//! runscript = "run.sh"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::archive::LockPolicy;
use crate::context::{JobContext, StageFlags, SweepGrid};
use crate::lattice::{Ensemble, Flavour, ParticlePair, Shift, SinkKind, SinkSpec, SourceKind, Structure};
use crate::paths::{PathTemplates, TemplateResolver};
use crate::scheduler::SchedulerSettings;
use crate::stages::SolverSettings;

/// File name of the run configuration inside `.colarun/`.
pub const CONFIG_FILE: &str = "colarun.toml";

/// `[run]` section: physics parameters and stage switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_kappa")]
    pub kappa: u32,
    #[serde(default = "default_strange_kappa")]
    pub strange_kappa: u32,
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default = "default_shifts")]
    pub shifts: Vec<String>,
    #[serde(default = "default_kds")]
    pub kds: Vec<i32>,
    #[serde(default = "default_structures")]
    pub structures: Vec<Vec<Flavour>>,
    #[serde(default = "default_pairs")]
    pub pairs: Vec<ParticlePair>,
    #[serde(default)]
    pub make_emodes: bool,
    #[serde(default = "default_true")]
    pub make_props: bool,
    #[serde(default = "default_true")]
    pub make_cfuns: bool,
    #[serde(default)]
    pub keep_props: bool,
    #[serde(default)]
    pub keep_emodes: bool,
    #[serde(default = "default_true")]
    pub tar_cfuns: bool,
}

fn default_kappa() -> u32 {
    13770
}

fn default_strange_kappa() -> u32 {
    13665
}

fn default_shifts() -> Vec<String> {
    vec!["x00t00".to_string()]
}

fn default_kds() -> Vec<i32> {
    vec![0]
}

fn default_structures() -> Vec<Vec<Flavour>> {
    vec![vec![Flavour::U, Flavour::D, Flavour::S]]
}

fn default_pairs() -> Vec<ParticlePair> {
    vec![ParticlePair::new("proton_1", "proton_1bar")]
}

fn default_true() -> bool {
    true
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            kappa: default_kappa(),
            strange_kappa: default_strange_kappa(),
            source: SourceKind::default(),
            shifts: default_shifts(),
            kds: default_kds(),
            structures: default_structures(),
            pairs: default_pairs(),
            make_emodes: false,
            make_props: true,
            make_cfuns: true,
            keep_props: false,
            keep_emodes: false,
            tar_cfuns: true,
        }
    }
}

/// `[ensemble]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleSection {
    #[serde(default = "default_run_prefix")]
    pub run_prefix: String,
    #[serde(default = "default_start")]
    pub start: u32,
    #[serde(default = "default_size")]
    pub size: u32,
    /// Trajectory spacing; defaults per run prefix when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<u32>,
    /// Chains running side by side, also the chain stride
    #[serde(default = "default_simultaneous_jobs")]
    pub simultaneous_jobs: u32,
}

fn default_run_prefix() -> String {
    "a".to_string()
}

fn default_start() -> u32 {
    1880
}

fn default_size() -> u32 {
    1
}

fn default_simultaneous_jobs() -> u32 {
    1
}

impl Default for EnsembleSection {
    fn default() -> Self {
        Self {
            run_prefix: default_run_prefix(),
            start: default_start(),
            size: default_size(),
            gap: None,
            simultaneous_jobs: default_simultaneous_jobs(),
        }
    }
}

/// `[sinks]` section: sink values per smearing kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinksSection {
    #[serde(default)]
    pub laplacian: Vec<u32>,
    #[serde(default = "default_smeared")]
    pub smeared: Vec<u32>,
}

fn default_smeared() -> Vec<u32> {
    vec![250]
}

impl Default for SinksSection {
    fn default() -> Self {
        Self {
            laplacian: Vec::new(),
            smeared: default_smeared(),
        }
    }
}

/// `[archive]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSection {
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_max_tries() -> u32 {
    10
}

fn default_backoff_secs() -> u64 {
    5
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

/// The complete colarun.toml configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColarunToml {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub ensemble: EnsembleSection,
    #[serde(default)]
    pub sinks: SinksSection,
    #[serde(default)]
    pub solvers: SolverSettings,
    #[serde(default)]
    pub directories: PathTemplates,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl ColarunToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse colarun.toml")
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize colarun.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn sweep_grid(&self) -> Result<SweepGrid> {
        let shifts = self
            .run
            .shifts
            .iter()
            .map(|s| s.parse::<Shift>().with_context(|| format!("Invalid shift in run.shifts: '{}'", s)))
            .collect::<Result<Vec<_>>>()?;
        SweepGrid::new(shifts, self.run.kds.clone())
    }

    pub fn ensemble(&self) -> Result<Ensemble> {
        let e = &self.ensemble;
        Ensemble::new(&e.run_prefix, e.start, e.size, e.gap, e.simultaneous_jobs)
    }

    /// Sink kinds with at least one value, Laplacian first.
    pub fn sink_specs(&self) -> Vec<SinkSpec> {
        [
            (SinkKind::Laplacian, &self.sinks.laplacian),
            (SinkKind::Smeared, &self.sinks.smeared),
        ]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(kind, values)| SinkSpec {
            kind,
            values: values.clone(),
        })
        .collect()
    }

    pub fn structures(&self) -> Result<Vec<Structure>> {
        if self.run.structures.is_empty() {
            bail!("run.structures must list at least one structure");
        }
        self.run
            .structures
            .iter()
            .map(|flavours| Structure::new(flavours.clone()))
            .collect()
    }

    /// Stage switches with eigenmodes forced on where later stages need them.
    pub fn stage_flags(&self) -> StageFlags {
        let run = &self.run;
        StageFlags {
            make_emodes: run.make_emodes,
            make_props: run.make_props,
            make_cfuns: run.make_cfuns,
            keep_props: run.keep_props,
            keep_emodes: run.keep_emodes,
            tar_cfuns: run.tar_cfuns,
        }
        .resolve(run.source, &self.sink_specs())
    }

    /// Context for the `nth` configuration of the ensemble.
    pub fn job_context(&self, nth: u32, job_id: &str) -> Result<JobContext> {
        let ensemble = self.ensemble()?;
        if !ensemble.contains(nth) {
            bail!(
                "Configuration index {} is outside the ensemble (1..={})",
                nth,
                ensemble.size
            );
        }
        if self.run.pairs.is_empty() {
            bail!("run.pairs must list at least one particle pair");
        }
        let sinks = self.sink_specs();
        if self.run.make_cfuns && sinks.is_empty() {
            bail!("make_cfuns is set but no sink values are configured");
        }

        Ok(JobContext {
            config_id: ensemble.config_id(nth),
            nth_config: nth,
            job_id: job_id.to_string(),
            kappa: self.run.kappa,
            strange_kappa: self.run.strange_kappa,
            flags: self.stage_flags(),
            source: self.run.source,
            sinks,
            structures: self.structures()?,
            pairs: self.run.pairs.clone(),
        })
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            max_tries: self.archive.max_tries,
            backoff: Duration::from_secs(self.archive.backoff_secs),
        }
    }

    /// Path resolver with relative output and work roots anchored at `project_dir`.
    pub fn resolver(&self, project_dir: &Path) -> Result<TemplateResolver> {
        let mut templates = self.directories.clone();
        templates.output = anchor(project_dir, &templates.output);
        templates.work = anchor(project_dir, &templates.work);
        TemplateResolver::new(templates)
    }

    /// Validate configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.sweep_grid() {
            warnings.push(format!("{:#}", e));
        }
        if let Err(e) = self.ensemble() {
            warnings.push(format!("{:#}", e));
        }
        if let Err(e) = self.structures() {
            warnings.push(format!("{:#}", e));
        }
        if self.run.pairs.is_empty() {
            warnings.push("run.pairs is empty; no correlators would be produced".to_string());
        }
        if self.run.make_cfuns && self.sink_specs().is_empty() {
            warnings.push("make_cfuns is set but no sink values are configured".to_string());
        }
        if self.run.tar_cfuns && !self.run.make_cfuns {
            warnings.push("tar_cfuns has no effect without make_cfuns".to_string());
        }
        if self.archive.max_tries == 0 {
            warnings.push("archive.max_tries is 0; archives will never be locked".to_string());
        }
        if let Err(e) = TemplateResolver::new(self.directories.clone()) {
            warnings.push(format!("{:#}", e));
        }
        warnings.extend(self.directories.validate());
        warnings.extend(self.scheduler.validate());

        warnings
    }
}

/// Join a relative template root onto `base`, keeping the trailing separator.
fn anchor(base: &Path, root: &str) -> String {
    if root.is_empty() || Path::new(root).is_absolute() || root.starts_with('{') {
        return root.to_string();
    }
    let mut joined = base.join(root).display().to_string();
    if root.ends_with('/') && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ColarunToml::parse("").unwrap();
        assert_eq!(config, ColarunToml::default());
        assert!(config.validate().iter().all(|w| w.contains("runscript")));
    }

    #[test]
    fn test_parse_full_file() {
        let config = ColarunToml::parse(
            r#"
[run]
kappa = 13781
source = "lp"
shifts = ["x00t00", "x16t08"]
kds = [0, 1, -1]
structures = [["u", "d", "s"], ["n", "d", "nh"]]
pairs = [{ chi = "lambda0_1", chibar = "sigma0_1bar" }]
keep_props = true

[ensemble]
run_prefix = "b"
start = 2000
size = 400
simultaneous_jobs = 4

[sinks]
laplacian = [96, 64]
smeared = []

[archive]
max_tries = 3
backoff_secs = 1

[scheduler]
kind = "pbs"
runscript = "job.pbs"
"#,
        )
        .unwrap();

        let grid = config.sweep_grid().unwrap();
        assert_eq!(grid.shifts().len(), 2);
        assert_eq!(grid.kds(), &[0, 1, -1]);

        let ensemble = config.ensemble().unwrap();
        assert_eq!(ensemble.gap, 10);
        assert_eq!(ensemble.stride, 4);

        let sinks = config.sink_specs();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].kind, SinkKind::Laplacian);

        // Laplacian source with propagators on forces eigenmodes
        let flags = config.stage_flags();
        assert!(flags.make_emodes);
        assert!(flags.keep_props);

        assert_eq!(config.lock_policy().max_tries, 3);
        assert_eq!(config.lock_policy().backoff, Duration::from_secs(1));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_job_context_for_index() {
        let config = ColarunToml {
            ensemble: EnsembleSection {
                size: 400,
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = config.job_context(3, "77").unwrap();
        assert_eq!(ctx.config_id.as_str(), "-a-001900");
        assert_eq!(ctx.nth_config, 3);
        assert_eq!(ctx.job_id, "77");
        assert!(config.job_context(401, "77").is_err());
        assert!(config.job_context(0, "77").is_err());
    }

    #[test]
    fn test_invalid_values_fail_at_construction() {
        let mut config = ColarunToml::default();
        config.run.shifts = vec!["q12".to_string()];
        assert!(config.sweep_grid().is_err());

        let mut config = ColarunToml::default();
        config.run.structures = vec![Vec::new()];
        assert!(config.structures().is_err());
        assert!(!config.validate().is_empty());

        let mut config = ColarunToml::default();
        config.ensemble.run_prefix = "zz".to_string();
        assert!(config.ensemble().is_err());
    }

    #[test]
    fn test_missing_sinks_rejected_for_correlators() {
        let mut config = ColarunToml::default();
        config.sinks.smeared.clear();
        assert!(config.job_context(1, "1").is_err());
        assert!(
            config
                .validate()
                .iter()
                .any(|w| w.contains("no sink values"))
        );
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = ColarunToml::default();
        config.run.kds = vec![0, 2, -2];
        config.save(&path).unwrap();
        assert_eq!(ColarunToml::load(&path).unwrap(), config);
        assert_eq!(
            ColarunToml::load_or_default(&dir.path().join("missing.toml")).unwrap(),
            ColarunToml::default()
        );
    }

    #[test]
    fn test_relative_roots_anchored_at_project() {
        let base = Path::new("/lattice/project");
        assert_eq!(anchor(base, "output/"), "/lattice/project/output/");
        assert_eq!(anchor(base, "/scratch/out/"), "/scratch/out/");
    }
}
