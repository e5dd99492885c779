//! Mapping from cell parameters to concrete file locations.
//!
//! The orchestrator never builds paths itself; it asks a `PathResolver`.
//! `TemplateResolver` is the bundled implementation, driven by the
//! `[directories]` templates in `colarun.toml`.
//!
//! # Placeholders
//!
//! | Placeholder       | Value                                                  |
//! |-------------------|--------------------------------------------------------|
//! | `{output}`        | `directories.output`                                   |
//! | `{work}`          | `directories.work`                                     |
//! | `{kappa}`         | run kappa                                              |
//! | `{kd}`            | field strength (flavour-scaled for props and emodes)   |
//! | `{shift}`         | shift label as written                                 |
//! | `{emode_shift}`   | spatial part of the shift                              |
//! | `{cfg}`           | configuration id                                       |
//! | `{nth}` / `{job}` | configuration index / scheduler job id                 |
//! | `{sink}`          | sink label with value, e.g. `lp96`                     |
//! | `{sink_kind}`     | sink tag without value, e.g. `lp`                      |
//! | `{pair}`          | chi and chibar concatenated                            |
//! | `{structure}`     | flavours concatenated, e.g. `uds`                      |
//! | `{quark}`         | flavour, with `l`/`h` light/heavy marker for props     |
//! | `{flavour_kappa}` | kappa the flavour is solved at                         |
//! | `{stage}` / `{tag}` | stage name and caller-chosen tag                     |

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::{Cell, JobContext, Stage};
use crate::lattice::{Flavour, ParticlePair, SinkKind, SinkSpec, Structure};

const KNOWN_PLACEHOLDERS: &[&str] = &[
    "output",
    "work",
    "kappa",
    "kd",
    "shift",
    "emode_shift",
    "cfg",
    "nth",
    "job",
    "sink",
    "sink_kind",
    "pair",
    "structure",
    "quark",
    "flavour_kappa",
    "stage",
    "tag",
];

/// Marker substituted for the sink value while building glob patterns.
const WILDCARD_MARK: &str = "\u{1}SINKVALUE\u{1}";

/// One correlator output of a cell.
#[derive(Debug, Clone, Copy)]
pub struct CorrelatorKey<'a> {
    pub cell: &'a Cell,
    pub sink: &'a SinkSpec,
    pub sink_value: u32,
    pub pair: &'a ParticlePair,
    pub structure: &'a Structure,
}

pub trait PathResolver: Send + Sync {
    fn correlator_file(&self, ctx: &JobContext, key: &CorrelatorKey<'_>) -> PathBuf;

    /// Glob pattern matching this correlator at every sink value.
    fn correlator_glob(
        &self,
        ctx: &JobContext,
        cell: &Cell,
        sink: &SinkSpec,
        pair: &ParticlePair,
        structure: &Structure,
    ) -> String;

    /// Archive collecting every shift and configuration of one correlator.
    fn archive_file(
        &self,
        ctx: &JobContext,
        kd: i32,
        sink: SinkKind,
        pair: &ParticlePair,
        structure: &Structure,
    ) -> PathBuf;

    fn propagator_file(&self, ctx: &JobContext, cell: &Cell, flavour: Flavour) -> PathBuf;

    fn eigenmode_file(&self, ctx: &JobContext, cell: &Cell, flavour: Flavour) -> PathBuf;

    fn report_file(&self, ctx: &JobContext, stage: Stage, tag: &str) -> PathBuf;

    /// Stub that input files are written next to and that solvers read on stdin.
    fn input_stub(&self, ctx: &JobContext, stage: Stage, tag: &str) -> PathBuf;
}

/// Path templates, one per artifact kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTemplates {
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_work")]
    pub work: String,
    #[serde(default = "default_correlator")]
    pub correlator: String,
    #[serde(default = "default_archive")]
    pub archive: String,
    #[serde(default = "default_propagator")]
    pub propagator: String,
    #[serde(default = "default_eigenmode")]
    pub eigenmode: String,
    #[serde(default = "default_report")]
    pub report: String,
    #[serde(default = "default_input")]
    pub input: String,
}

fn default_output() -> String {
    "output/".to_string()
}
fn default_work() -> String {
    "work/".to_string()
}
fn default_correlator() -> String {
    "{output}cfuns/k{kappa}/BF{kd}/{sink_kind}/sh{shift}/icfg{cfg}si{sink}.{pair}_{structure}.u.2cf"
        .to_string()
}
fn default_archive() -> String {
    "{output}cfuns/k{kappa}/BF{kd}/{sink_kind}/{pair}_{structure}.tar".to_string()
}
fn default_propagator() -> String {
    "{work}props/k{kappa}/BF{kd}/sh{shift}/prop{cfg}.{quark}k{flavour_kappa}.prop".to_string()
}
fn default_eigenmode() -> String {
    "{work}emodes/k{kappa}/BF{kd}/sh{emode_shift}/lapmode{cfg}.{quark}.evec".to_string()
}
fn default_report() -> String {
    "{output}reports/{stage}/{job}_{nth}.{tag}.rep".to_string()
}
fn default_input() -> String {
    "{work}inputs/{stage}/{job}_{nth}.{tag}".to_string()
}

impl Default for PathTemplates {
    fn default() -> Self {
        Self {
            output: default_output(),
            work: default_work(),
            correlator: default_correlator(),
            archive: default_archive(),
            propagator: default_propagator(),
            eigenmode: default_eigenmode(),
            report: default_report(),
            input: default_input(),
        }
    }
}

impl PathTemplates {
    /// Warnings for placeholders no resolver will ever fill in.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, template) in self.named() {
            for placeholder in placeholders(template) {
                if !KNOWN_PLACEHOLDERS.contains(&placeholder.as_str()) {
                    warnings.push(format!(
                        "Unknown placeholder '{{{}}}' in directories.{}",
                        placeholder, name
                    ));
                }
            }
        }
        warnings
    }

    fn named(&self) -> [(&'static str, &str); 6] {
        [
            ("correlator", &self.correlator),
            ("archive", &self.archive),
            ("propagator", &self.propagator),
            ("eigenmode", &self.eigenmode),
            ("report", &self.report),
            ("input", &self.input),
        ]
    }
}

fn placeholders(template: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        found.push(after[..close].to_string());
        rest = &after[close + 1..];
    }
    found
}

/// Renders `[directories]` templates.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    templates: PathTemplates,
}

impl TemplateResolver {
    /// Archives are shared by every shift and configuration, so their
    /// template may not depend on either.
    pub fn new(templates: PathTemplates) -> Result<Self> {
        for forbidden in ["{shift}", "{emode_shift}", "{cfg}", "{nth}", "{job}", "{sink}"] {
            if templates.archive.contains(forbidden) {
                bail!(
                    "directories.archive must not contain {} (archives are shared across jobs)",
                    forbidden
                );
            }
        }
        for (name, template) in [
            ("correlator", &templates.correlator),
            ("propagator", &templates.propagator),
            ("eigenmode", &templates.eigenmode),
        ] {
            if !template.contains("{cfg}") {
                bail!("directories.{} must contain {{cfg}}", name);
            }
        }
        if !templates.correlator.contains("{sink}") {
            bail!("directories.correlator must contain {{sink}}");
        }
        Ok(Self { templates })
    }

    fn render(&self, template: &str, vars: &[(&str, String)]) -> String {
        let mut out = template
            .replace("{output}", &self.templates.output)
            .replace("{work}", &self.templates.work);
        for (key, value) in vars {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }

    fn job_vars(ctx: &JobContext) -> Vec<(&'static str, String)> {
        vec![
            ("kappa", ctx.kappa.to_string()),
            ("cfg", ctx.config_id.to_string()),
            ("nth", ctx.nth_config.to_string()),
            ("job", ctx.job_id.clone()),
        ]
    }

    fn correlator_vars(
        ctx: &JobContext,
        cell: &Cell,
        sink_label: String,
        sink_kind: SinkKind,
        pair: &ParticlePair,
        structure: &Structure,
    ) -> Vec<(&'static str, String)> {
        let mut vars = Self::job_vars(ctx);
        vars.extend([
            ("kd", cell.kd.to_string()),
            ("shift", cell.shift.label().to_string()),
            ("sink", sink_label),
            ("sink_kind", sink_kind.tag().to_string()),
            ("pair", pair.label()),
            ("structure", structure.label()),
        ]);
        vars
    }
}

impl PathResolver for TemplateResolver {
    fn correlator_file(&self, ctx: &JobContext, key: &CorrelatorKey<'_>) -> PathBuf {
        let vars = Self::correlator_vars(
            ctx,
            key.cell,
            key.sink.label(key.sink_value),
            key.sink.kind,
            key.pair,
            key.structure,
        );
        PathBuf::from(self.render(&self.templates.correlator, &vars))
    }

    fn correlator_glob(
        &self,
        ctx: &JobContext,
        cell: &Cell,
        sink: &SinkSpec,
        pair: &ParticlePair,
        structure: &Structure,
    ) -> String {
        let marked = format!("{}{}", sink.kind.tag(), WILDCARD_MARK);
        let vars = Self::correlator_vars(ctx, cell, marked, sink.kind, pair, structure);
        let rendered = self.render(&self.templates.correlator, &vars);
        glob::Pattern::escape(&rendered).replace(WILDCARD_MARK, "*")
    }

    fn archive_file(
        &self,
        ctx: &JobContext,
        kd: i32,
        sink: SinkKind,
        pair: &ParticlePair,
        structure: &Structure,
    ) -> PathBuf {
        let vars = [
            ("kappa", ctx.kappa.to_string()),
            ("kd", kd.to_string()),
            ("sink_kind", sink.tag().to_string()),
            ("pair", pair.label()),
            ("structure", structure.label()),
        ];
        PathBuf::from(self.render(&self.templates.archive, &vars))
    }

    fn propagator_file(&self, ctx: &JobContext, cell: &Cell, flavour: Flavour) -> PathBuf {
        let (marker, flavour_kappa) = if flavour.is_heavy() {
            ("h", ctx.strange_kappa)
        } else {
            ("l", ctx.kappa)
        };
        let mut vars = Self::job_vars(ctx);
        vars.extend([
            ("kd", (cell.kd * flavour.charge()).to_string()),
            ("shift", cell.shift.label().to_string()),
            ("emode_shift", cell.shift.spatial_label()),
            ("quark", marker.to_string()),
            ("flavour_kappa", flavour_kappa.to_string()),
        ]);
        PathBuf::from(self.render(&self.templates.propagator, &vars))
    }

    fn eigenmode_file(&self, ctx: &JobContext, cell: &Cell, flavour: Flavour) -> PathBuf {
        let mut vars = Self::job_vars(ctx);
        vars.extend([
            ("kd", (cell.kd * flavour.charge()).to_string()),
            ("emode_shift", cell.shift.spatial_label()),
            ("quark", flavour.to_string()),
        ]);
        PathBuf::from(self.render(&self.templates.eigenmode, &vars))
    }

    fn report_file(&self, ctx: &JobContext, stage: Stage, tag: &str) -> PathBuf {
        let mut vars = Self::job_vars(ctx);
        vars.extend([("stage", stage.to_string()), ("tag", tag.to_string())]);
        PathBuf::from(self.render(&self.templates.report, &vars))
    }

    fn input_stub(&self, ctx: &JobContext, stage: Stage, tag: &str) -> PathBuf {
        let mut vars = Self::job_vars(ctx);
        vars.extend([("stage", stage.to_string()), ("tag", tag.to_string())]);
        PathBuf::from(self.render(&self.templates.input, &vars))
    }
}

/// Archive member name for a file appended under `shift_label`.
///
/// Only the basename of `file` is kept, so the name does not depend on the
/// directory layout the correlator templates produce.
pub fn member_name(shift_label: &str, file: &Path) -> String {
    let basename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("sh{}/{}", shift_label, basename)
}
