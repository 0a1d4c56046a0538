//! Write-to-temp-then-rename helpers shared by the state store and the
//! materializer.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Writes `bytes` to a fresh temp file next to `dest` and flushes it to
/// disk. Nothing at `dest` changes until [`commit`] is called.
pub fn stage(dest: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let dir = parent_dir(dest)?;
    fs::create_dir_all(dir)?;

    let prefix = format!(
        ".{}.",
        dest.file_name().and_then(|s| s.to_str()).unwrap_or("wallslot")
    );
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Atomically replaces `dest` with the staged file.
pub fn commit(staged: NamedTempFile, dest: &Path) -> io::Result<()> {
    staged.persist(dest).map_err(|e| e.error)?;
    // Make the rename itself durable; not every filesystem supports it.
    if let Ok(dir) = fs::File::open(parent_dir(dest)?) {
        let _ = dir.sync_all();
    }
    Ok(())
}

pub fn atomic_write(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let staged = stage(dest, bytes)?;
    commit(staged, dest)
}

/// Keeps the current content of `path` reachable under a hidden sibling
/// name so a later step can roll back. `None` if `path` does not exist.
pub fn preserve(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let backup = parent_dir(path)?.join(format!(
        ".{}.prev",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("wallslot")
    ));
    match fs::remove_file(&backup) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if fs::hard_link(path, &backup).is_err() {
        fs::copy(path, &backup)?;
    }
    Ok(Some(backup))
}

/// Undoes a replacement of `path`: puts `backup` back, or removes `path`
/// when there was nothing before.
pub fn restore(path: &Path, backup: Option<&Path>) -> io::Result<()> {
    match backup {
        Some(backup) => fs::rename(backup, path),
        None => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}

pub fn discard(backup: Option<&Path>) {
    if let Some(backup) = backup {
        if let Err(e) = fs::remove_file(backup) {
            log::debug!("Failed to remove backup {:?}: {}", backup, e);
        }
    }
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} has no parent directory", path),
            )
        })
}
