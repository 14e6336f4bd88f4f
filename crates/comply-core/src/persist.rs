//! Crash-safe file persistence.
//!
//! Every persisted artifact goes through one of these helpers:
//! - [`write_atomic`] replaces a document (temp file in the same directory,
//!   fsync, rename over the destination).
//! - [`write_once`] creates an immutable artifact and refuses to overwrite;
//!   [`write_secret_once`] does the same with owner-only permissions.
//! - [`quarantine`] renames a corrupt file aside instead of deleting it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{ComplianceError, Result};

/// Atomically replace `path` with `bytes`.
///
/// The destination is never observable half-written: readers see either
/// the previous complete file or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage(path, bytes, false)?;

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(ComplianceError::persistence(path, e));
    }
    sync_parent(path);

    Ok(())
}

/// Create `path` with `bytes`, failing if it already exists.
///
/// Content is staged in a temp file first so a crash never leaves a
/// partial artifact under the final name.
pub fn write_once(path: &Path, bytes: &[u8]) -> Result<()> {
    link_once(path, stage(path, bytes, false)?)
}

/// Like [`write_once`] for key material: on unix the file is created
/// readable and writable by its owner only (0600).
pub fn write_secret_once(path: &Path, bytes: &[u8]) -> Result<()> {
    link_once(path, stage(path, bytes, true)?)
}

fn link_once(path: &Path, tmp: PathBuf) -> Result<()> {
    // hard_link fails with AlreadyExists instead of silently replacing.
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    linked.map_err(|e| ComplianceError::persistence(path, e))?;
    sync_parent(path);

    Ok(())
}

/// Rename a corrupt file aside as `<name>.corrupt-<timestamp>` and return
/// the new location. The file is never deleted.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());

    let mut target = path.with_file_name(format!("{file_name}.corrupt-{stamp}"));
    if target.exists() {
        target = path.with_file_name(format!(
            "{file_name}.corrupt-{stamp}-{}",
            Uuid::new_v4().simple()
        ));
    }

    fs::rename(path, &target).map_err(|e| ComplianceError::persistence(path, e))?;

    tracing::error!(
        path = %path.display(),
        quarantined_to = %target.display(),
        "Corrupt file moved aside"
    );

    Ok(target)
}

/// Open `path` for appending, creating parent directories as needed.
pub fn open_append(path: &Path) -> Result<File> {
    ensure_parent(path)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ComplianceError::persistence(path, e))
}

/// Create the parent directory of `path` if it doesn't exist.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ComplianceError::persistence(parent, e))?;
        }
    }
    Ok(())
}

/// Write `bytes` to a uniquely named temp file next to `path` and fsync it.
/// A `secret` file is created owner-only, so the mode carries over to the
/// hard link.
fn stage(path: &Path, bytes: &[u8], secret: bool) -> Result<PathBuf> {
    ensure_parent(path)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = (|| -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        if secret {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        #[cfg(not(unix))]
        let _ = secret;
        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(ComplianceError::persistence(&tmp, e));
    }

    Ok(tmp)
}

/// Best-effort fsync of the containing directory so the rename is durable.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
