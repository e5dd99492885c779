//! `<tar>.status` marker locking.
//!
//! The marker is created with create-new semantics, which is the only
//! primitive that behaves on every shared filesystem the clusters use. The
//! holder also takes an fs2 advisory lock on the open marker. Contenders
//! never rely on that lock for exclusion, but when they give up they probe it
//! to tell a busy archive apart from a marker left behind by a crashed job.
//! Stale markers are reported, never removed.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::LockError;

/// Retry policy for contended archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_tries: u32,
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_tries: 10,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Path of the marker guarding `target`.
pub fn marker_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".status");
    PathBuf::from(name)
}

/// Exclusive hold on an archive. Dropping it removes the marker.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Released archive lock"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove archive lock marker"
            ),
        }
    }
}

/// Acquire the marker for `target`, sleeping `policy.backoff` between tries.
///
/// The sleep blocks the calling thread and is not cancellable.
pub fn acquire_lock(target: &Path, policy: &LockPolicy) -> Result<LockGuard, LockError> {
    let path = marker_path(target);
    let mut attempts = 0;

    while attempts < policy.max_tries {
        attempts += 1;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                let file = match FileExt::try_lock_exclusive(&file) {
                    Ok(()) => Some(file),
                    Err(e) => {
                        tracing::debug!(
                            path = %path.display(),
                            error = %e,
                            "Advisory lock unavailable; relying on marker only"
                        );
                        None
                    }
                };
                return Ok(LockGuard { path, file });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(
                    path = %path.display(),
                    attempt = attempts,
                    max_tries = policy.max_tries,
                    "Archive lock held by another job"
                );
                std::thread::sleep(policy.backoff);
            }
            Err(source) => return Err(LockError::Io { path, source }),
        }
    }

    if holder_looks_dead(&path) {
        tracing::warn!(
            path = %path.display(),
            "No live process holds this lock marker; it may have been left by a crashed job and must be removed by hand"
        );
    }
    Err(LockError::Contended { path, attempts })
}

/// A marker nobody holds an advisory lock on was probably abandoned.
fn holder_looks_dead(path: &Path) -> bool {
    match File::open(path) {
        Ok(file) => {
            let free = FileExt::try_lock_shared(&file).is_ok();
            if free {
                let _ = FileExt::unlock(&file);
            }
            free
        }
        Err(_) => false,
    }
}
