use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lmq_core::errors::{ErrorInfo, LmqError};

pub(crate) fn io_error(code: &str, path: &Path, err: impl ToString) -> LmqError {
    LmqError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<(), LmqError> {
    fs::create_dir_all(dir).map_err(|err| io_error("create_dir", dir, err))
}

/// Sibling path used as the staging file for an atomic replace.
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "staging".to_string());
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

/// Replaces `path` with `bytes` so readers see either the old or the new content.
///
/// Errors are reported through `wrap` so callers can attribute them to their own family.
pub(crate) fn atomic_write_with(
    path: &Path,
    bytes: &[u8],
    wrap: impl Fn(&str, &Path, std::io::Error) -> LmqError,
) -> Result<(), LmqError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| wrap("create_dir", parent, err))?;
    }
    let staging = staging_path(path);
    let result = (|| {
        let mut file = fs::File::create(&staging).map_err(|err| wrap("staging_create", &staging, err))?;
        file.write_all(bytes)
            .map_err(|err| wrap("staging_write", &staging, err))?;
        file.sync_all()
            .map_err(|err| wrap("staging_sync", &staging, err))?;
        fs::rename(&staging, path).map_err(|err| wrap("rename", path, err))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&staging);
        return result;
    }
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// [`atomic_write_with`] reporting failures as serde errors.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), LmqError> {
    atomic_write_with(path, bytes, |code, path, err| io_error(code, path, err))
}
