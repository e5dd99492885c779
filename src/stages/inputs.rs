//! Solver input files.
//!
//! The fixed-format files each solver binary parses are produced by an
//! `InputWriter`. The bundled `SummaryInputWriter` dumps the stage's
//! parameters one value per line next to the filestub and keeps a readable
//! `name = value` record of every launch.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::context::Stage;

pub trait InputWriter: Send + Sync {
    /// Write the input files for one solver launch. Must be idempotent.
    fn write_inputs(&self, stage: Stage, filestub: &Path, values: &[(&str, String)]) -> Result<()>;
}

/// Values file `<filestub>.<stage>` plus an appended `<filestub>.summary`.
#[derive(Debug, Clone, Default)]
pub struct SummaryInputWriter;

const NAME_WIDTH: usize = 20;

impl SummaryInputWriter {
    pub fn values_path(stage: Stage, filestub: &Path) -> PathBuf {
        with_suffix(filestub, stage.as_str())
    }

    pub fn summary_path(filestub: &Path) -> PathBuf {
        with_suffix(filestub, "summary")
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl InputWriter for SummaryInputWriter {
    fn write_inputs(&self, stage: Stage, filestub: &Path, values: &[(&str, String)]) -> Result<()> {
        if let Some(parent) = filestub.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create input directory {}", parent.display())
            })?;
        }

        let values_path = Self::values_path(stage, filestub);
        let mut body = String::new();
        for (_, value) in values {
            body.push_str(value);
            body.push('\n');
        }
        std::fs::write(&values_path, body)
            .with_context(|| format!("Failed to write input file {}", values_path.display()))?;

        let summary_path = Self::summary_path(filestub);
        let mut summary = format!("[{}]\n", stage);
        for (name, value) in values {
            summary.push_str(&format!("{:<width$}= {}\n", name, value, width = NAME_WIDTH));
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&summary_path)
            .and_then(|mut f| f.write_all(summary.as_bytes()))
            .with_context(|| format!("Failed to append input summary {}", summary_path.display()))?;

        Ok(())
    }
}
