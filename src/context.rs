//! Per-process orchestration context.
//!
//! A `JobContext` is built once from the validated configuration and the
//! scheduler environment, then passed by reference through the sweep. It
//! lives exactly as long as one configuration's run.

use anyhow::{Result, bail};
use std::path::PathBuf;

use crate::lattice::{ConfigId, ParticlePair, Shift, SinkKind, SinkSpec, SourceKind, Structure};

/// The three solver stages of one cell, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Eigenmodes,
    Propagators,
    Correlators,
}

impl Stage {
    /// Short name used in report and input directories.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Eigenmodes => "emode",
            Stage::Propagators => "prop",
            Stage::Correlators => "cfun",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipeline stages run, and which intermediate artifacts survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageFlags {
    pub make_emodes: bool,
    pub make_props: bool,
    pub make_cfuns: bool,
    pub keep_props: bool,
    pub keep_emodes: bool,
    pub tar_cfuns: bool,
}

impl StageFlags {
    /// Turn on eigenmode generation when a later stage cannot run without it.
    pub fn resolve(mut self, source: SourceKind, sinks: &[SinkSpec]) -> Self {
        if source.needs_eigenmodes() && self.make_props {
            self.make_emodes = true;
        }
        if self.make_cfuns && sinks.iter().any(|s| s.kind == SinkKind::Laplacian) {
            self.make_emodes = true;
        }
        self
    }
}

/// Identity and coverage of one configuration's run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub config_id: ConfigId,
    /// 1-based index of the configuration within the ensemble
    pub nth_config: u32,
    /// Scheduler job (or array) id, keys private working files
    pub job_id: String,
    pub kappa: u32,
    pub strange_kappa: u32,
    pub flags: StageFlags,
    pub source: SourceKind,
    pub sinks: Vec<SinkSpec>,
    pub structures: Vec<Structure>,
    pub pairs: Vec<ParticlePair>,
}

impl JobContext {
    /// The same run parameters, retargeted at another configuration.
    ///
    /// Used by the chain submitter to ask whether a candidate is complete.
    pub fn for_config(&self, nth_config: u32, config_id: ConfigId) -> JobContext {
        JobContext {
            config_id,
            nth_config,
            ..self.clone()
        }
    }
}

/// One point of the sweep grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub kd: i32,
    pub shift: Shift,
}

impl Cell {
    pub fn new(kd: i32, shift: Shift) -> Self {
        Self { kd, shift }
    }

    /// Checkpoint label wrapping the cell's stages.
    pub fn checkpoint_label(&self) -> String {
        format!("Set (kd,shift): ({},{})", self.kd, self.shift)
    }
}

/// Shift (outer) by field strength (inner) sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepGrid {
    shifts: Vec<Shift>,
    kds: Vec<i32>,
}

impl SweepGrid {
    pub fn new(shifts: Vec<Shift>, kds: Vec<i32>) -> Result<Self> {
        if shifts.is_empty() {
            bail!("Sweep grid needs at least one shift");
        }
        if kds.is_empty() {
            bail!("Sweep grid needs at least one field strength (kd)");
        }
        Ok(Self { shifts, kds })
    }

    pub fn shifts(&self) -> &[Shift] {
        &self.shifts
    }

    pub fn kds(&self) -> &[i32] {
        &self.kds
    }

    /// Each shift paired with the one after it, `None` for the last.
    pub fn with_lookahead(&self) -> impl Iterator<Item = (&Shift, Option<&Shift>)> {
        self.shifts
            .iter()
            .enumerate()
            .map(|(i, shift)| (shift, self.shifts.get(i + 1)))
    }

    pub fn len(&self) -> usize {
        self.shifts.len() * self.kds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Intermediate artifacts owned by the current shift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    pub propagators: Vec<PathBuf>,
    pub eigenmodes: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn record_propagators(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        push_unique(&mut self.propagators, paths);
    }

    pub fn record_eigenmodes(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        push_unique(&mut self.eigenmodes, paths);
    }

    pub fn is_empty(&self) -> bool {
        self.propagators.is_empty() && self.eigenmodes.is_empty()
    }
}

fn push_unique(list: &mut Vec<PathBuf>, paths: impl IntoIterator<Item = PathBuf>) {
    for path in paths {
        if !list.contains(&path) {
            list.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(s: &str) -> Shift {
        s.parse().unwrap()
    }

    #[test]
    fn test_lookahead_ends_with_none() {
        let grid = SweepGrid::new(vec![shift("x0t0"), shift("x0t8"), shift("x8t0")], vec![0, 1]).unwrap();
        let pairs: Vec<_> = grid
            .with_lookahead()
            .map(|(s, n)| (s.label().to_string(), n.map(|n| n.label().to_string())))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("x0t0".to_string(), Some("x0t8".to_string())),
                ("x0t8".to_string(), Some("x8t0".to_string())),
                ("x8t0".to_string(), None),
            ]
        );
        assert_eq!(grid.len(), 6);
    }

    #[test]
    fn test_grid_rejects_empty_axes() {
        assert!(SweepGrid::new(vec![], vec![0]).is_err());
        assert!(SweepGrid::new(vec![shift("x0t0")], vec![]).is_err());
    }

    #[test]
    fn test_flags_force_eigenmodes_for_laplacian_source() {
        let flags = StageFlags {
            make_props: true,
            ..Default::default()
        };
        assert!(flags.resolve(SourceKind::Lp, &[]).make_emodes);
        assert!(!flags.resolve(SourceKind::Sm, &[]).make_emodes);
    }

    #[test]
    fn test_flags_force_eigenmodes_for_laplacian_sink() {
        let sinks = vec![SinkSpec {
            kind: SinkKind::Laplacian,
            values: vec![96],
        }];
        let flags = StageFlags {
            make_cfuns: true,
            ..Default::default()
        };
        assert!(flags.resolve(SourceKind::Sm, &sinks).make_emodes);

        let no_cfuns = StageFlags::default();
        assert!(!no_cfuns.resolve(SourceKind::Sm, &sinks).make_emodes);
    }

    #[test]
    fn test_artifact_set_deduplicates() {
        let mut set = ArtifactSet::default();
        set.record_eigenmodes(vec![PathBuf::from("a"), PathBuf::from("b")]);
        set.record_eigenmodes(vec![PathBuf::from("a")]);
        assert_eq!(set.eigenmodes.len(), 2);
        assert!(set.propagators.is_empty());
    }

    #[test]
    fn test_checkpoint_label() {
        let cell = Cell::new(-1, shift("x16t08"));
        assert_eq!(cell.checkpoint_label(), "Set (kd,shift): (-1,x16t08)");
    }
}
