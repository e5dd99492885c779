use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::str::FromStr;

use crate::context::Cell;
use crate::lattice::ConfigId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Skipped,
    Started,
    Completed,
    Failed,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Skipped => "skipped",
            CellStatus::Started => "started",
            CellStatus::Completed => "completed",
            CellStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CellStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skipped" => Ok(CellStatus::Skipped),
            "started" => Ok(CellStatus::Started),
            "completed" => Ok(CellStatus::Completed),
            "failed" => Ok(CellStatus::Failed),
            other => bail!("Unknown cell status '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub config_id: String,
    pub kd: i32,
    pub shift: String,
    pub status: CellStatus,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of what each job did to each cell.
/// Format: cfg|kd|shift|status|timestamp
pub struct StateManager {
    state_file: std::path::PathBuf,
}

impl StateManager {
    pub fn new(state_file: std::path::PathBuf) -> Self {
        Self { state_file }
    }

    pub fn save(&self, config_id: &ConfigId, cell: &Cell, status: CellStatus) -> Result<()> {
        let entry = format!(
            "{}|{}|{}|{}|{}\n",
            config_id,
            cell.kd,
            cell.shift,
            status,
            Utc::now().to_rfc3339()
        );

        if let Some(parent) = self.state_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .context("Failed to open state file")?
            .write_all(entry.as_bytes())
            .context("Failed to write state entry")?;

        Ok(())
    }

    /// All entries in write order. Lines that do not parse are skipped.
    pub fn get_entries(&self) -> Result<Vec<StateEntry>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;

        let entries = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split('|').collect();
                if parts.len() != 5 {
                    return None;
                }
                Some(StateEntry {
                    config_id: parts[0].to_string(),
                    kd: parts[1].parse().ok()?,
                    shift: parts[2].to_string(),
                    status: parts[3].parse().ok()?,
                    timestamp: DateTime::parse_from_rfc3339(parts[4])
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect();

        Ok(entries)
    }

    /// Entries for one configuration.
    pub fn get_config_entries(&self, config_id: &str) -> Result<Vec<StateEntry>> {
        let entries = self.get_entries()?;
        Ok(entries
            .into_iter()
            .filter(|e| e.config_id == config_id)
            .collect())
    }

    /// Latest status recorded for a cell.
    pub fn last_status(&self, config_id: &str, kd: i32, shift: &str) -> Option<CellStatus> {
        self.get_entries()
            .ok()?
            .into_iter()
            .rfind(|e| e.config_id == config_id && e.kd == kd && e.shift == shift)
            .map(|e| e.status)
    }

    pub fn reset(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).context("Failed to remove state file")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_manager() -> (StateManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".colarun/state");
        (StateManager::new(path), dir)
    }

    fn cell(kd: i32, shift: &str) -> Cell {
        Cell::new(kd, shift.parse().unwrap())
    }

    #[test]
    fn test_state_empty() {
        let (mgr, _dir) = make_manager();
        assert!(mgr.get_entries().unwrap().is_empty());
        assert!(mgr.last_status("-a-001880", 0, "x0t0").is_none());
    }

    #[test]
    fn test_save_and_get_entries() {
        let (mgr, _dir) = make_manager();
        let cfg = ConfigId::new("-a-001880");
        mgr.save(&cfg, &cell(1, "x0t0"), CellStatus::Started).unwrap();
        mgr.save(&cfg, &cell(1, "x0t0"), CellStatus::Completed).unwrap();
        mgr.save(&cfg, &cell(-1, "x16t8"), CellStatus::Skipped).unwrap();

        let entries = mgr.get_entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].config_id, "-a-001880");
        assert_eq!(entries[2].kd, -1);
        assert_eq!(entries[2].shift, "x16t8");
        assert_eq!(
            mgr.last_status("-a-001880", 1, "x0t0"),
            Some(CellStatus::Completed)
        );
    }

    #[test]
    fn test_config_entries_filtered() {
        let (mgr, _dir) = make_manager();
        mgr.save(&ConfigId::new("-a-001880"), &cell(0, "x0t0"), CellStatus::Started)
            .unwrap();
        mgr.save(&ConfigId::new("-a-001890"), &cell(0, "x0t0"), CellStatus::Started)
            .unwrap();
        assert_eq!(mgr.get_config_entries("-a-001890").unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (mgr, _dir) = make_manager();
        mgr.save(&ConfigId::new("-a-001880"), &cell(0, "x0t0"), CellStatus::Failed)
            .unwrap();
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&mgr.state_file)
            .unwrap();
        writeln!(file, "garbage|line").unwrap();
        writeln!(file, "-a-001880|zero|x0t0|completed|2026-01-01T00:00:00Z").unwrap();

        assert_eq!(mgr.get_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_reset_removes_file() {
        let (mgr, _dir) = make_manager();
        mgr.save(&ConfigId::new("-a-001880"), &cell(0, "x0t0"), CellStatus::Started)
            .unwrap();
        mgr.reset().unwrap();
        assert!(mgr.get_entries().unwrap().is_empty());
        mgr.reset().unwrap();
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            CellStatus::Skipped,
            CellStatus::Started,
            CellStatus::Completed,
            CellStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CellStatus>().unwrap(), status);
        }
        assert!("running".parse::<CellStatus>().is_err());
    }
}
