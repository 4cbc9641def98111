//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// Read a file, treating "not found" as `None`.
pub fn read_optional(path: &Path, operation: &str) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::internal_io(e.to_string(), Some(operation.to_string()))),
    }
}

/// Create a directory and its parents. Returns `true` if it did not exist before.
pub fn ensure_dir(path: &Path, operation: &str) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;
    Ok(true)
}

fn io_error(e: impl std::fmt::Display, operation: &str, stage: &str) -> Error {
    Error::internal_io(e.to_string(), Some(format!("{} ({})", operation, stage)))
}

/// Write content atomically (exclusive temp file, chmod, then rename).
///
/// The temp file is created with `O_EXCL` under a random name, so nothing
/// planted next to the target is followed. Readers see either the old
/// content or the new content, never a partial write.
pub fn write_file_atomic(path: &Path, content: &str, mode: u32, operation: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    let filename = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;

    ensure_dir(parent, operation)?;
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", filename.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| io_error(e, operation, "create temp"))?;

    temp.write_all(content.as_bytes())
        .map_err(|e| io_error(e, operation, "write temp"))?;

    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| io_error(e, operation, "chmod"))?;

    temp.persist(path)
        .map_err(|e| io_error(e.error, operation, "rename"))?;

    Ok(())
}

/// Write `content` to a new private file in the system temp dir.
///
/// The file is mode 0600 and is removed when the handle drops.
pub fn write_temp_file(prefix: &str, content: &str, operation: &str) -> Result<NamedTempFile> {
    let mut temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile()
        .map_err(|e| io_error(e, operation, "create temp"))?;

    temp.write_all(content.as_bytes())
        .and_then(|_| temp.flush())
        .map_err(|e| io_error(e, operation, "write temp"))?;

    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_optional_returns_none_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = read_optional(&dir.path().join("absent"), "test read").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn ensure_dir_reports_creation_once() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b");
        assert!(ensure_dir(&target, "mkdir").unwrap());
        assert!(!ensure_dir(&target, "mkdir").unwrap());
    }

    #[test]
    fn write_file_atomic_sets_mode_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("bin/launch.sh");
        write_file_atomic(&target, "#!/bin/sh\n", 0o755, "write launcher").unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(fs::read_to_string(&target).unwrap(), "#!/bin/sh\n");
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("bin"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("launch.sh")]);
    }

    #[test]
    fn write_file_atomic_ignores_planted_symlink() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("victim");
        fs::write(&victim, "ORIGINAL").unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::os::unix::fs::symlink(&victim, dir.path().join("bin/.launch.sh.tmp")).unwrap();

        let target = dir.path().join("bin/launch.sh");
        write_file_atomic(&target, "#!/bin/sh\n", 0o755, "write launcher").unwrap();

        assert_eq!(fs::read_to_string(&victim).unwrap(), "ORIGINAL");
        let victim_mode = fs::metadata(&victim).unwrap().permissions().mode() & 0o777;
        assert_ne!(victim_mode, 0o755);
        assert_eq!(fs::read_to_string(&target).unwrap(), "#!/bin/sh\n");
    }

    #[test]
    fn temp_file_is_private_and_removed_on_drop() {
        let temp = write_temp_file("uv-installer-", "echo hi\n", "write installer").unwrap();
        let path = temp.path().to_path_buf();
        assert_eq!(fs::read_to_string(&path).unwrap(), "echo hi\n");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o077, 0);
        drop(temp);
        assert!(!path.exists());
    }
}
