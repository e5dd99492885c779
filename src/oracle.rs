//! Decides whether a cell's correlators already exist.
//!
//! A correlator counts as done when either its loose file exists or
//! `sh<shift>/<basename>` is a member of the archive it would be folded into.
//! Combinations that vanish identically are never expected on disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::tarball;
use crate::context::{Cell, JobContext, SweepGrid};
use crate::errors::OracleError;
use crate::lattice::Shift;
use crate::paths::{CorrelatorKey, PathResolver, member_name};

#[derive(Clone)]
pub struct CompletionOracle {
    resolver: Arc<dyn PathResolver>,
}

/// Archive member lists read during one query.
#[derive(Default)]
struct MemberCache {
    archives: HashMap<PathBuf, Option<HashSet<String>>>,
}

impl MemberCache {
    fn contains(&mut self, tar_path: &Path, member: &str) -> Result<bool, OracleError> {
        if !self.archives.contains_key(tar_path) {
            let names = tarball::member_names(tar_path).map_err(|source| {
                OracleError::ArchiveUnreadable {
                    path: tar_path.to_path_buf(),
                    source,
                }
            })?;
            self.archives.insert(tar_path.to_path_buf(), names);
        }
        Ok(self
            .archives
            .get(tar_path)
            .and_then(|names| names.as_ref())
            .is_some_and(|names| names.contains(member)))
    }
}

impl CompletionOracle {
    pub fn new(resolver: Arc<dyn PathResolver>) -> Self {
        Self { resolver }
    }

    /// Whether every requested cell is complete.
    ///
    /// `None` for `kd` or `shift` means every value on that axis of `grid`.
    /// An archive that cannot be read counts as incomplete, so the work is
    /// redone rather than silently skipped.
    pub fn is_complete(
        &self,
        ctx: &JobContext,
        grid: &SweepGrid,
        kd: Option<i32>,
        shift: Option<&Shift>,
    ) -> bool {
        match self.try_is_complete(ctx, grid, kd, shift) {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(cfg = %ctx.config_id, error = %e, "Treating cell as incomplete");
                false
            }
        }
    }

    /// Like `is_complete`, but surfaces unreadable archives.
    pub fn try_is_complete(
        &self,
        ctx: &JobContext,
        grid: &SweepGrid,
        kd: Option<i32>,
        shift: Option<&Shift>,
    ) -> Result<bool, OracleError> {
        let kds: Vec<i32> = match kd {
            Some(kd) => vec![kd],
            None => grid.kds().to_vec(),
        };
        let shifts: Vec<&Shift> = match shift {
            Some(shift) => vec![shift],
            None => grid.shifts().iter().collect(),
        };

        let mut cache = MemberCache::default();
        for shift in shifts {
            for &kd in &kds {
                let cell = Cell::new(kd, shift.clone());
                if !self.cell_complete(ctx, &cell, &mut cache)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn cell_complete(
        &self,
        ctx: &JobContext,
        cell: &Cell,
        cache: &mut MemberCache,
    ) -> Result<bool, OracleError> {
        for sink in &ctx.sinks {
            for &sink_value in &sink.values {
                for pair in &ctx.pairs {
                    if pair.is_vanishing(cell.kd) {
                        continue;
                    }
                    for structure in &ctx.structures {
                        let key = CorrelatorKey {
                            cell,
                            sink,
                            sink_value,
                            pair,
                            structure,
                        };
                        let loose = self.resolver.correlator_file(ctx, &key);
                        if loose.exists() {
                            continue;
                        }
                        let tar_path =
                            self.resolver
                                .archive_file(ctx, cell.kd, sink.kind, pair, structure);
                        let member = member_name(cell.shift.label(), &loose);
                        if !cache.contains(&tar_path, &member)? {
                            tracing::debug!(
                                cfg = %ctx.config_id,
                                kd = cell.kd,
                                shift = %cell.shift,
                                missing = %loose.display(),
                                "Correlator not found loose or archived"
                            );
                            return Ok(false);
                        }
                    }
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::{ArchivalService, LockPolicy};
    use crate::lattice::{ParticlePair, SinkKind, SinkSpec};
    use crate::paths::{PathTemplates, TemplateResolver};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    pub(crate) fn resolver_in(dir: &TempDir) -> Arc<dyn PathResolver> {
        let templates = PathTemplates {
            output: format!("{}/out/", dir.path().display()),
            work: format!("{}/work/", dir.path().display()),
            ..Default::default()
        };
        Arc::new(TemplateResolver::new(templates).unwrap())
    }

    pub(crate) fn grid(shifts: &[&str], kds: &[i32]) -> SweepGrid {
        SweepGrid::new(shifts.iter().map(|s| s.parse().unwrap()).collect(), kds.to_vec()).unwrap()
    }

    /// Write every correlator of `cell` as a loose file; returns the paths.
    pub(crate) fn write_correlators(
        resolver: &dyn PathResolver,
        ctx: &JobContext,
        cell: &Cell,
    ) -> Vec<PathBuf> {
        let mut written = Vec::new();
        for sink in &ctx.sinks {
            for &sink_value in &sink.values {
                for pair in &ctx.pairs {
                    for structure in &ctx.structures {
                        let key = CorrelatorKey {
                            cell,
                            sink,
                            sink_value,
                            pair,
                            structure,
                        };
                        let path = resolver.correlator_file(ctx, &key);
                        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                        std::fs::write(&path, "cfun").unwrap();
                        written.push(path);
                    }
                }
            }
        }
        written
    }

    fn ctx() -> JobContext {
        crate::paths::tests::sample_context()
    }

    #[test]
    fn test_nothing_on_disk_is_incomplete() {
        let dir = tempdir().unwrap();
        let oracle = CompletionOracle::new(resolver_in(&dir));
        let g = grid(&["x0t0"], &[0, 1]);
        assert!(!oracle.is_complete(&ctx(), &g, Some(1), Some(&g.shifts()[0])));
        assert!(!oracle.is_complete(&ctx(), &g, None, None));
    }

    #[test]
    fn test_loose_files_complete_a_cell() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let g = grid(&["x0t0"], &[0, 1]);
        let shift = &g.shifts()[0];

        write_correlators(resolver.as_ref(), &ctx(), &Cell::new(1, shift.clone()));

        assert!(oracle.is_complete(&ctx(), &g, Some(1), Some(shift)));
        // kd = 0 still missing, so the whole grid is not done
        assert!(!oracle.is_complete(&ctx(), &g, None, Some(shift)));
        assert!(!oracle.is_complete(&ctx(), &g, None, None));

        write_correlators(resolver.as_ref(), &ctx(), &Cell::new(0, shift.clone()));
        assert!(oracle.is_complete(&ctx(), &g, None, None));
    }

    #[test]
    fn test_archived_correlators_complete_a_cell() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let g = grid(&["x16t08"], &[1]);
        let c = ctx();
        let cell = Cell::new(1, g.shifts()[0].clone());

        let files = write_correlators(resolver.as_ref(), &c, &cell);
        let tar = resolver.archive_file(&c, 1, SinkKind::Smeared, &c.pairs[0], &c.structures[0]);
        ArchivalService::new(LockPolicy::default())
            .archive(&tar, &files, cell.shift.label(), &c.config_id)
            .unwrap();
        assert!(files.iter().all(|f| !f.exists()));

        assert!(oracle.is_complete(&c, &g, None, None));

        // A different configuration is not satisfied by this archive
        let other = c.for_config(2, crate::lattice::ConfigId::new("-a-001890"));
        assert!(!oracle.is_complete(&other, &g, None, None));
    }

    #[test]
    fn test_archived_correlators_found_without_shift_directory() {
        let dir = tempdir().unwrap();
        let templates = PathTemplates {
            output: format!("{}/out/", dir.path().display()),
            work: format!("{}/work/", dir.path().display()),
            correlator: "{output}cfuns/BF{kd}/{cfg}/icfg{cfg}si{sink}.{pair}_{structure}sh{shift}.2cf"
                .to_string(),
            ..Default::default()
        };
        let resolver: Arc<dyn PathResolver> = Arc::new(TemplateResolver::new(templates).unwrap());
        let oracle = CompletionOracle::new(resolver.clone());
        let g = grid(&["x16t08"], &[1]);
        let c = ctx();
        let cell = Cell::new(1, g.shifts()[0].clone());

        let files = write_correlators(resolver.as_ref(), &c, &cell);
        assert!(oracle.is_complete(&c, &g, None, None));

        let tar = resolver.archive_file(&c, 1, SinkKind::Smeared, &c.pairs[0], &c.structures[0]);
        ArchivalService::new(LockPolicy::default())
            .archive(&tar, &files, cell.shift.label(), &c.config_id)
            .unwrap();
        assert!(files.iter().all(|f| !f.exists()));

        assert!(oracle.is_complete(&c, &g, None, None));
    }

    #[test]
    fn test_vanishing_pairs_are_not_expected_at_zero_field() {
        let dir = tempdir().unwrap();
        let oracle = CompletionOracle::new(resolver_in(&dir));
        let mut c = ctx();
        c.pairs = vec![ParticlePair::new("lambda0_1", "sigma0_1bar")];
        let g = grid(&["x0t0"], &[0, 1]);

        assert!(oracle.is_complete(&c, &g, Some(0), None));
        assert!(!oracle.is_complete(&c, &g, Some(1), None));
    }

    #[test]
    fn test_every_sink_value_is_required() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let g = grid(&["x0t0"], &[1]);
        let mut c = ctx();
        let cell = Cell::new(1, g.shifts()[0].clone());
        write_correlators(resolver.as_ref(), &c, &cell);
        assert!(oracle.is_complete(&c, &g, None, None));

        c.sinks = vec![SinkSpec {
            kind: SinkKind::Smeared,
            values: vec![250, 400],
        }];
        assert!(!oracle.is_complete(&c, &g, None, None));
    }

    #[test]
    fn test_corrupt_archive_defaults_to_incomplete() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let g = grid(&["x0t0"], &[1]);
        let c = ctx();

        let tar = resolver.archive_file(&c, 1, SinkKind::Smeared, &c.pairs[0], &c.structures[0]);
        std::fs::create_dir_all(tar.parent().unwrap()).unwrap();
        std::fs::write(&tar, vec![0x41u8; 700]).unwrap();

        assert!(matches!(
            oracle.try_is_complete(&c, &g, None, None),
            Err(OracleError::ArchiveUnreadable { .. })
        ));
        assert!(!oracle.is_complete(&c, &g, None, None));
    }

    #[test]
    fn test_contended_lock_does_not_affect_oracle() {
        let dir = tempdir().unwrap();
        let resolver = resolver_in(&dir);
        let oracle = CompletionOracle::new(resolver.clone());
        let g = grid(&["x0t0"], &[1]);
        let c = ctx();
        let cell = Cell::new(1, g.shifts()[0].clone());
        let files = write_correlators(resolver.as_ref(), &c, &cell);
        let tar = resolver.archive_file(&c, 1, SinkKind::Smeared, &c.pairs[0], &c.structures[0]);
        std::fs::create_dir_all(tar.parent().unwrap()).unwrap();
        let _held = crate::archive::acquire_lock(&tar, &LockPolicy::default()).unwrap();

        let quick = ArchivalService::new(LockPolicy {
            max_tries: 1,
            backoff: Duration::from_millis(5),
        });
        quick.archive(&tar, &files, cell.shift.label(), &c.config_id).unwrap();

        // Files were left loose, which still counts
        assert!(oracle.is_complete(&c, &g, None, None));
    }
}
