use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use selfswap_core::{append_to_file_name, remove_file_if_exists, Error, IoResultExt, Result};

/// A lock older than this belongs to an issuer that died while holding it.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Exclusive lock over the update record, held while it is read and mutated.
/// Released on drop.
#[derive(Debug)]
pub struct AttemptLock {
    path: PathBuf,
}

impl AttemptLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with_stale_age(path, STALE_LOCK_AGE)
    }

    pub fn acquire_with_stale_age(path: &Path, stale_age: Duration) -> Result<Self> {
        match Self::try_create(path) {
            Err(Error::LockBusy { .. }) if lock_is_stale(path, stale_age) => {
                Self::break_stale(path, stale_age)
            }
            other => other,
        }
    }

    /// Two instances can both see the same stale lock. Only the one holding
    /// the break marker may delete it, and it checks staleness again first,
    /// so a lock another instance just broke and re-created survives.
    fn break_stale(path: &Path, stale_age: Duration) -> Result<Self> {
        let marker_path = append_to_file_name(path, ".break");
        let _marker = match Self::try_create(&marker_path) {
            Ok(marker) => marker,
            Err(Error::LockBusy { .. }) => {
                if lock_is_stale(&marker_path, stale_age) {
                    tracing::warn!(
                        path = %marker_path.display(),
                        "clearing abandoned lock break marker"
                    );
                    remove_file_if_exists(&marker_path).io_context(|| {
                        format!("failed to remove {}", marker_path.display())
                    })?;
                }
                return Err(Error::LockBusy {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(err),
        };

        if lock_is_stale(path, stale_age) {
            tracing::warn!(path = %path.display(), "breaking abandoned update lock");
            remove_file_if_exists(path)
                .io_context(|| format!("failed to remove stale lock {}", path.display()))?;
        }
        Self::try_create(path)
    }

    /// Retries a busy lock a few times; the startup check only holds it for
    /// a handful of file operations.
    pub fn acquire_with_retry(path: &Path, attempts: u32, delay: Duration) -> Result<Self> {
        let mut remaining = attempts.max(1);
        loop {
            match Self::acquire(path) {
                Err(Error::LockBusy { .. }) if remaining > 1 => {
                    remaining -= 1;
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .io_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::LockBusy {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to claim update lock {}", path.display()),
                    err,
                ));
            }
        };

        let lock = Self {
            path: path.to_path_buf(),
        };
        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .io_context(|| format!("failed to write update lock {}", path.display()))?;
        Ok(lock)
    }
}

impl Drop for AttemptLock {
    fn drop(&mut self) {
        if let Err(err) = remove_file_if_exists(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release update lock");
        }
    }
}

fn lock_is_stale(path: &Path, stale_age: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age >= stale_age)
        .unwrap_or(false)
}
