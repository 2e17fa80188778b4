//! Device node accessors for sysfs, procfs and ConfigFS attributes

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Write string content to an attribute
///
/// sysfs attributes require a single atomic write() syscall: the kernel
/// processes the value on the first write(), so the complete buffer
/// (including newline) is built before writing.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    // Truncate so shorter values fully replace longer ones in regular files;
    // some special files reject O_TRUNC, so retry write-only
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .or_else(|_| OpenOptions::new().write(true).open(path))
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| AppError::Gadget(format!("Failed to open {}: {}", path.display(), e)))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .map_err(|e| AppError::Gadget(format!("Failed to write to {}: {}", path.display(), e)))?;

    file.flush()
        .map_err(|e| AppError::Gadget(format!("Failed to flush {}: {}", path.display(), e)))?;

    Ok(())
}

/// Read an attribute, trimmed of surrounding whitespace
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| AppError::Gadget(format!("Failed to read {}: {}", path.display(), e)))
}

/// Read an attribute on the blocking pool, giving up after `timeout`
///
/// Some sysfs attributes block inside the driver while the controller is
/// suspended; callers that must stay responsive use this instead of
/// [`read_file`].
pub async fn read_file_timeout(path: &Path, timeout: Duration) -> Result<String> {
    let owned = path.to_path_buf();
    let task = tokio::task::spawn_blocking(move || read_file(&owned));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(AppError::Internal(format!("Read task failed: {}", e))),
        Err(_) => Err(AppError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Create directory if not exists
pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        AppError::Gadget(format!(
            "Failed to create directory {}: {}",
            path.display(),
            e
        ))
    })
}

/// Remove file or symlink if it exists
pub fn remove_file(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).map_err(|e| {
            AppError::Gadget(format!("Failed to remove {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

/// Create symlink
pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| {
        AppError::Gadget(format!(
            "Failed to create symlink {} -> {}: {}",
            dest.display(),
            src.display(),
            e
        ))
    })
}

/// List the symlinks directly inside `dir`
pub fn list_symlinks(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::Gadget(format!(
            "Failed to read directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    Ok(entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_symlink()).unwrap_or(false))
        .map(|e| e.path())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_appends_newline_and_read_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("UDC");

        write_file(&path, "11210000.dwc3").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "11210000.dwc3\n");
        assert_eq!(read_file(&path).unwrap(), "11210000.dwc3");

        write_file(&path, "none").unwrap();
        assert_eq!(read_file(&path).unwrap(), "none");
    }

    #[test]
    fn test_symlink_listing_ignores_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("ffs.adb");
        create_dir(&target).unwrap();
        write_file(&dir.path().join("MaxPower"), "500").unwrap();
        create_symlink(&target, &dir.path().join("function0")).unwrap();

        let links = list_symlinks(dir.path()).unwrap();
        assert_eq!(links, vec![dir.path().join("function0")]);

        remove_file(&links[0]).unwrap();
        assert!(list_symlinks(dir.path()).unwrap().is_empty());
        // Removing twice is fine
        remove_file(&links[0]).unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout_reports_missing_node() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_file_timeout(&dir.path().join("current_speed"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AppError::Gadget(_))));
    }
}
