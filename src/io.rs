use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Atomically write `data` to `path` using a tempfile in the same directory,
/// so a crash mid-write leaves the previous file in place.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::persistence(dir, e))?;
    tmp.write_all(data).map_err(|e| Error::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::persistence(path, e.error))?;
    Ok(())
}

/// Check that files can be created next to `path`, creating its directory if needed.
pub fn ensure_writable(path: &Path) -> Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(|e| Error::persistence(dir, e))?;
    // dropped right away, which removes it
    NamedTempFile::new_in(dir).map_err(|e| Error::persistence(dir, e))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
