//! Ensemble-wide completeness survey.
//!
//! The full survey asks the completion oracle about every configuration,
//! which opens every archive once per configuration. The quick survey only
//! reads the `cfglist` sidecars: a configuration counts as done when every
//! archive it should have contributed to lists it.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use crate::archive::sidecar;
use crate::context::{JobContext, SweepGrid};
use crate::lattice::{ConfigId, Ensemble};
use crate::oracle::CompletionOracle;
use crate::paths::PathResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingConfig {
    pub config_id: ConfigId,
    pub nth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingReport {
    pub surveyed: u32,
    pub missing: Vec<MissingConfig>,
}

impl MissingReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// One `<cfg id> <index>` line per missing configuration.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for m in &self.missing {
            let _ = writeln!(out, "{} {}", m.config_id, m.nth);
        }
        out
    }
}

/// Ask the oracle about every configuration of the ensemble.
pub fn full_survey(
    oracle: &CompletionOracle,
    grid: &SweepGrid,
    base: &JobContext,
    ensemble: &Ensemble,
) -> MissingReport {
    let mut report = MissingReport::default();
    for nth in 1..=ensemble.size {
        let config_id = ensemble.config_id(nth);
        let ctx = base.for_config(nth, config_id.clone());
        report.surveyed += 1;
        if !oracle.is_complete(&ctx, grid, None, None) {
            tracing::debug!(cfg = %config_id, nth, "Configuration incomplete");
            report.missing.push(MissingConfig { config_id, nth });
        }
    }
    report
}

/// Intersect the `cfglist` sidecars of every archive the grid writes to.
pub fn quick_survey(
    resolver: &dyn PathResolver,
    grid: &SweepGrid,
    base: &JobContext,
    ensemble: &Ensemble,
) -> Result<MissingReport> {
    let mut done: Option<HashSet<String>> = None;

    for &kd in grid.kds() {
        for sink in &base.sinks {
            for pair in base.pairs.iter().filter(|p| !p.is_vanishing(kd)) {
                for structure in &base.structures {
                    let tar = resolver.archive_file(base, kd, sink.kind, pair, structure);
                    let listed = sidecar::read_cfglist(&tar).with_context(|| {
                        format!("Failed to read {}", sidecar::cfglist_path(&tar).display())
                    })?;
                    done = Some(match done {
                        None => listed,
                        Some(seen) => seen.intersection(&listed).cloned().collect(),
                    });
                }
            }
        }
    }

    // No archive is required at all, so nothing can be missing
    let Some(done) = done else {
        return Ok(MissingReport {
            surveyed: ensemble.size,
            missing: Vec::new(),
        });
    };

    let mut report = MissingReport::default();
    for nth in 1..=ensemble.size {
        let config_id = ensemble.config_id(nth);
        report.surveyed += 1;
        if !done.contains(config_id.as_str()) {
            report.missing.push(MissingConfig { config_id, nth });
        }
    }
    Ok(report)
}

pub fn write_missing(path: &Path, report: &MissingReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, report.to_lines())
        .with_context(|| format!("Failed to write missing list {}", path.display()))
}
