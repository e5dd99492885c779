//! Typed error hierarchy for the colarun orchestrator.
//!
//! One enum per subsystem:
//! - `ShiftError` — malformed shift specifiers
//! - `TimerError` — checkpoint timer misuse
//! - `LockError` — archive lock acquisition
//! - `ArchiveError` — tar append and sidecar writes
//! - `OracleError` — archive inspection during completion checks
//! - `StageError` — external solver launches
//! - `SchedulerError` — chained job submission

use std::path::PathBuf;
use thiserror::Error;

/// A shift specifier that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShiftError {
    #[error("Shift '{0}' has no direction components")]
    Empty(String),

    #[error("Shift '{spec}' has unknown direction '{direction}'")]
    UnknownDirection { spec: String, direction: char },

    #[error("Shift '{spec}' has a malformed component near '{fragment}'")]
    Malformed { spec: String, fragment: String },
}

/// Errors from the checkpoint timer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("Timer '{0}' was never started")]
    UnknownTimer(String),

    #[error("Checkpoint '{0}' does not exist")]
    UnknownCheckpoint(String),
}

/// Errors from acquiring the `<tar>.status` marker.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock {path} still held after {attempts} attempts")]
    Contended { path: PathBuf, attempts: u32 },

    #[error("Failed to create lock marker at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while appending to an archive under its lock.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to append to archive {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove archived source {path}: {source}")]
    RemoveSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write sidecar {path}: {source}")]
    Sidecar {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Errors from inspecting an existing archive.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Archive {path} could not be read: {source}")]
    ArchiveUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from launching an external solver binary.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to spawn solver {executable}: {source}")]
    SpawnFailed {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Solver {executable} exited with code {code} (report: {report})")]
    NonZeroExit {
        executable: String,
        code: i32,
        report: PathBuf,
    },

    #[error("Solver {executable} timed out after {secs} seconds")]
    TimedOut { executable: String, secs: u64 },

    #[error("Failed to write solver report at {path}: {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from submitting the next configuration to the batch scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to spawn submit command {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Submit command {command} exited with code {code}: {stderr}")]
    Rejected {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Scheduler is not configured: {0}")]
    NotConfigured(String),
}
