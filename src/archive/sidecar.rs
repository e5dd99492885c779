//! `cfglist` and `info` logs kept next to each archive.
//!
//! Both are newline-delimited and append-only. `cfglist` gets one
//! configuration id per archival; `info` gets the original path of every
//! archived file.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn sidecar_path(tar_path: &Path, suffix: &str) -> PathBuf {
    let mut name = tar_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `<tar>cfglist`
pub fn cfglist_path(tar_path: &Path) -> PathBuf {
    sidecar_path(tar_path, "cfglist")
}

/// `<tar>info`
pub fn info_path(tar_path: &Path) -> PathBuf {
    sidecar_path(tar_path, "info")
}

pub fn append_lines<I, S>(path: &Path, lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line.as_ref());
        buf.push('\n');
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buf.as_bytes())?;
    file.sync_data()
}

/// Configuration ids recorded for `tar_path`; empty if nothing was archived.
pub fn read_cfglist(tar_path: &Path) -> io::Result<HashSet<String>> {
    match std::fs::read_to_string(cfglist_path(tar_path)) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(e),
    }
}
