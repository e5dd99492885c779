//! Append-only access to correlator tar archives.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const BLOCK: u64 = 512;

/// Names of every member in `tar_path`, or `None` when the archive does not
/// exist yet. Names are normalised without a leading `/` or `./`.
pub fn member_names(tar_path: &Path) -> io::Result<Option<HashSet<String>>> {
    let file = match File::open(tar_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut archive = tar::Archive::new(file);
    let mut names = HashSet::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        names.insert(normalise(&path.to_string_lossy()));
    }
    Ok(Some(names))
}

/// Strip the root and current-directory prefixes so `/shX/f`, `./shX/f`
/// and `shX/f` compare equal.
pub fn normalise(name: &str) -> String {
    let mut name = name;
    loop {
        if let Some(rest) = name.strip_prefix("./") {
            name = rest;
        } else if let Some(rest) = name.strip_prefix('/') {
            name = rest;
        } else {
            return name.to_string();
        }
    }
}

/// Append `(source, member name)` pairs to `tar_path`, creating it if needed.
///
/// The old end-of-archive blocks are overwritten by the new members and a
/// fresh trailer is written after them. The file is synced before returning,
/// so callers may delete the sources once this succeeds. A failed append is
/// rolled back: members written before the failure are cut off again.
pub fn append_members(tar_path: &Path, members: &[(PathBuf, String)]) -> io::Result<()> {
    if let Some(parent) = tar_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(tar_path)?;

    let end = end_of_members(&mut file)?;
    file.set_len(end)?;
    file.seek(SeekFrom::Start(end))?;

    if let Err(e) = write_members(&mut file, members) {
        if let Err(rollback) = close_at(&mut file, end) {
            tracing::warn!(
                archive = %tar_path.display(),
                error = %rollback,
                "Failed to roll back partial append"
            );
        }
        return Err(e);
    }
    file.sync_all()
}

fn write_members(file: &mut File, members: &[(PathBuf, String)]) -> io::Result<()> {
    let mut builder = tar::Builder::new(file);
    for (source, name) in members {
        builder.append_path_with_name(source, name)?;
    }
    builder.finish()
}

/// Discard everything after `end` and terminate the archive there.
fn close_at(file: &mut File, end: u64) -> io::Result<()> {
    file.set_len(end)?;
    file.seek(SeekFrom::Start(end))?;
    file.write_all(&[0u8; 2 * BLOCK as usize])?;
    file.sync_all()
}

/// Byte offset just past the data of the last member.
fn end_of_members(file: &mut File) -> io::Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut end = 0;
    {
        let mut archive = tar::Archive::new(&mut *file);
        for entry in archive.entries()? {
            let entry = entry?;
            let size = entry.header().entry_size()?;
            end = entry.raw_file_position() + size.div_ceil(BLOCK) * BLOCK;
        }
    }
    Ok(end)
}
