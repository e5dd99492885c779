//! Folding loose correlator files into shared tar archives.
//!
//! Many jobs append to the same archive, so every mutation happens under the
//! `<tar>.status` marker lock:
//!
//! 1. acquire the marker (bounded retries, abandoned on exhaustion)
//! 2. append every candidate as `sh<shift>/<basename>`
//! 3. once the archive is synced, delete the loose originals
//! 4. record the configuration in `<tar>cfglist` and the sources in `<tar>info`
//! 5. release the marker, also on every error path

pub mod lock;
pub mod sidecar;
pub mod tarball;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::{ArchiveError, LockError};
use crate::lattice::ConfigId;
use crate::paths::member_name;

pub use lock::{LockGuard, LockPolicy, acquire_lock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// No candidate files; the lock was not touched.
    NothingToDo,
    Archived { members: usize },
    /// Another job kept the archive locked; nothing was modified.
    Abandoned { attempts: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct ArchivalService {
    policy: LockPolicy,
}

impl ArchivalService {
    pub fn new(policy: LockPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Append `candidates` to `tar_path` under `shift_label`.
    ///
    /// Lock contention is not an error: the outcome is `Abandoned` and the
    /// sources stay on disk for a later run to pick up.
    pub fn archive(
        &self,
        tar_path: &Path,
        candidates: &[PathBuf],
        shift_label: &str,
        config_id: &ConfigId,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        if candidates.is_empty() {
            return Ok(ArchiveOutcome::NothingToDo);
        }

        if let Some(parent) = tar_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ArchiveError::Append {
                path: tar_path.to_path_buf(),
                source,
            })?;
        }

        let guard = match acquire_lock(tar_path, &self.policy) {
            Ok(guard) => guard,
            Err(LockError::Contended { path, attempts }) => {
                tracing::warn!(
                    lock = %path.display(),
                    attempts,
                    files = candidates.len(),
                    "Archive presumed locked by another job; leaving files unarchived"
                );
                return Ok(ArchiveOutcome::Abandoned { attempts });
            }
            Err(e) => return Err(e.into()),
        };

        let result = append_locked(tar_path, candidates, shift_label, config_id);
        drop(guard);
        result
    }
}

fn append_locked(
    tar_path: &Path,
    candidates: &[PathBuf],
    shift_label: &str,
    config_id: &ConfigId,
) -> Result<ArchiveOutcome, ArchiveError> {
    let members: Vec<(PathBuf, String)> = candidates
        .iter()
        .map(|file| (file.clone(), member_name(shift_label, file)))
        .collect();

    tarball::append_members(tar_path, &members).map_err(|source| ArchiveError::Append {
        path: tar_path.to_path_buf(),
        source,
    })?;

    for file in candidates {
        match std::fs::remove_file(file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ArchiveError::RemoveSource {
                    path: file.clone(),
                    source,
                });
            }
        }
    }

    let cfglist = sidecar::cfglist_path(tar_path);
    sidecar::append_lines(&cfglist, [config_id.as_str()])
        .map_err(|source| ArchiveError::Sidecar { path: cfglist, source })?;

    let info = sidecar::info_path(tar_path);
    sidecar::append_lines(&info, candidates.iter().map(|p| p.display().to_string()))
        .map_err(|source| ArchiveError::Sidecar { path: info, source })?;

    tracing::info!(
        archive = %tar_path.display(),
        members = members.len(),
        shift = shift_label,
        cfg = %config_id,
        "Archived correlators"
    );
    Ok(ArchiveOutcome::Archived {
        members: members.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn service() -> ArchivalService {
        ArchivalService::new(LockPolicy {
            max_tries: 3,
            backoff: Duration::from_millis(20),
        })
    }

    fn loose(dir: &Path, name: &str) -> PathBuf {
        let shift_dir = dir.join("shx16t08");
        std::fs::create_dir_all(&shift_dir).unwrap();
        let path = shift_dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    fn cfg() -> ConfigId {
        ConfigId::new("-a-001880")
    }

    #[test]
    fn test_empty_candidates_do_not_touch_lock() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("x.tar");
        // A held marker would make any acquisition attempt wait
        std::fs::write(lock::marker_path(&tar), "").unwrap();

        let start = Instant::now();
        let outcome = service().archive(&tar, &[], "x16t08", &cfg()).unwrap();
        assert_eq!(outcome, ArchiveOutcome::NothingToDo);
        assert!(start.elapsed() < Duration::from_millis(20));
        assert!(!tar.exists());
    }

    #[test]
    fn test_archive_adds_member_deletes_source_and_logs_config() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("tars/proton_uds.tar");
        let file = loose(dir.path(), "icfg-a-001880sism250.u.2cf");

        let outcome = service().archive(&tar, &[file.clone()], "x16t08", &cfg()).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Archived { members: 1 });

        let names = tarball::member_names(&tar).unwrap().unwrap();
        assert_eq!(names.len(), 1);
        assert!(names.contains("shx16t08/icfg-a-001880sism250.u.2cf"));
        assert!(!file.exists());

        let cfglist = std::fs::read_to_string(sidecar::cfglist_path(&tar)).unwrap();
        assert_eq!(cfglist.lines().collect::<Vec<_>>(), vec!["-a-001880"]);
        let info = std::fs::read_to_string(sidecar::info_path(&tar)).unwrap();
        assert_eq!(info.lines().next().unwrap(), file.display().to_string());
        assert!(!lock::marker_path(&tar).exists());
    }

    #[test]
    fn test_cfglist_grows_one_line_per_archival() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("x.tar");
        let a = loose(dir.path(), "a.2cf");
        let b = loose(dir.path(), "b.2cf");
        let svc = service();

        svc.archive(&tar, &[a], "x16t08", &cfg()).unwrap();
        svc.archive(&tar, &[b], "x16t08", &ConfigId::new("-a-001890")).unwrap();

        let cfglist = std::fs::read_to_string(sidecar::cfglist_path(&tar)).unwrap();
        assert_eq!(cfglist.lines().count(), 2);
        assert_eq!(tarball::member_names(&tar).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_contended_archive_is_abandoned_untouched() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("x.tar");
        let file = loose(dir.path(), "a.2cf");
        let _held = acquire_lock(&tar, &LockPolicy::default()).unwrap();

        let svc = service();
        let start = Instant::now();
        let outcome = svc.archive(&tar, &[file.clone()], "x16t08", &cfg()).unwrap();

        assert_eq!(outcome, ArchiveOutcome::Abandoned { attempts: 3 });
        assert!(start.elapsed() >= svc.policy().backoff * 3);
        assert!(file.exists());
        assert!(!tar.exists());
        assert!(!sidecar::cfglist_path(&tar).exists());
    }

    #[test]
    fn test_lock_released_when_append_fails() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("x.tar");
        let present = loose(dir.path(), "a.2cf");
        let missing = dir.path().join("shx16t08/never-written.2cf");

        let err = service()
            .archive(&tar, &[present.clone(), missing], "x16t08", &cfg())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Append { .. }));
        assert!(!lock::marker_path(&tar).exists());
        // Sources are only removed after a successful append
        assert!(present.exists());
        assert!(!sidecar::cfglist_path(&tar).exists());
    }

    #[test]
    fn test_retry_after_failed_append_archives_once() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("x.tar");
        let present = loose(dir.path(), "a.2cf");
        let missing = dir.path().join("shx16t08/never-written.2cf");
        let svc = service();

        assert!(svc.archive(&tar, &[present.clone(), missing], "x16t08", &cfg()).is_err());
        assert!(tarball::member_names(&tar).unwrap().unwrap().is_empty());

        let outcome = svc.archive(&tar, &[present], "x16t08", &cfg()).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Archived { members: 1 });
        let entries = tar::Archive::new(std::fs::File::open(&tar).unwrap())
            .entries()
            .unwrap()
            .count();
        assert_eq!(entries, 1);
        let cfglist = std::fs::read_to_string(sidecar::cfglist_path(&tar)).unwrap();
        assert_eq!(cfglist.lines().count(), 1);
    }

    #[test]
    fn test_lock_released_when_archive_is_corrupt() {
        let dir = tempdir().unwrap();
        let tar = dir.path().join("x.tar");
        std::fs::write(&tar, vec![0x41u8; 700]).unwrap();
        let file = loose(dir.path(), "a.2cf");

        assert!(service().archive(&tar, &[file.clone()], "x16t08", &cfg()).is_err());
        assert!(!lock::marker_path(&tar).exists());
        assert!(file.exists());
    }
}
