//! Whole-file writes through a temporary sibling and a rename.
//!
//! The canonical path either keeps its previous contents or holds the complete
//! new contents; a failed write only ever leaves a stray temporary file behind.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

use crate::StoreError;

fn temp_sibling(path: &Path) -> Result<NamedTempFile, StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = Builder::new()
        .prefix(&format!(".{name}.part_"))
        .tempfile_in(dir)?;
    Ok(tmp)
}

/// Write `path`, replacing any existing file.
pub(crate) fn write_replace<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut File) -> Result<(), StoreError>,
{
    let mut tmp = temp_sibling(path)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Write `path` only if it does not exist yet.
///
/// Returns `Ok(false)` when the path is already taken.
pub(crate) fn write_new<F>(path: &Path, write: F) -> Result<bool, StoreError>
where
    F: FnOnce(&mut File) -> Result<(), StoreError>,
{
    let mut tmp = temp_sibling(path)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StoreError::Io(e.error)),
    }
}
