use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use selfswap_core::{
    append_to_file_name, remove_dir_if_exists, trim_exe_ext, Error, IoResultExt, Result, Version,
    UPDATES_CACHE_DIR_NAME, UPDATE_RECORD_EXT,
};

/// Every path the issuer side touches, derived from the issuer executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerLayout {
    issuer_exe: PathBuf,
}

impl IssuerLayout {
    pub fn new(issuer_exe: impl Into<PathBuf>) -> Self {
        Self {
            issuer_exe: issuer_exe.into(),
        }
    }

    /// Layout for the running executable.
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe()
            .io_context(|| "failed to resolve current executable path".to_string())?;
        let exe = fs::canonicalize(&exe).unwrap_or(exe);
        Ok(Self::new(exe))
    }

    pub fn issuer_exe(&self) -> &Path {
        &self.issuer_exe
    }

    pub fn issuer_dir(&self) -> PathBuf {
        self.issuer_exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// File name of the executable; also the archive entry holding its
    /// replacement.
    pub fn issuer_file_name(&self) -> String {
        self.issuer_exe
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn issuer_name(&self) -> String {
        trim_exe_ext(Path::new(&self.issuer_file_name()))
            .to_string_lossy()
            .into_owned()
    }

    pub fn update_record_path(&self) -> PathBuf {
        append_to_file_name(&trim_exe_ext(&self.issuer_exe), UPDATE_RECORD_EXT)
    }

    pub fn lock_path(&self) -> PathBuf {
        append_to_file_name(&self.update_record_path(), ".lock")
    }

    pub fn settings_path(&self) -> PathBuf {
        append_to_file_name(&trim_exe_ext(&self.issuer_exe), ".selfswap.toml")
    }

    pub fn updates_cache_dir(&self) -> PathBuf {
        self.issuer_dir().join(UPDATES_CACHE_DIR_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.updates_cache_dir()
            .join(format!("{}.log", self.issuer_name()))
    }

    /// A staging directory name no other attempt can share.
    pub fn fresh_update_dir(&self, version: &Version) -> Result<PathBuf> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| {
                Error::io(
                    "system time is before unix epoch",
                    std::io::Error::other(err),
                )
            })?
            .as_nanos();
        Ok(self.updates_cache_dir().join(format!(
            "{}-{}-{}-{}",
            self.issuer_name(),
            version.as_str().trim(),
            std::process::id(),
            nanos
        )))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        let dir = self.updates_cache_dir();
        fs::create_dir_all(&dir).io_context(|| format!("failed to create {}", dir.display()))
    }

    /// Staging directories currently in the updates cache. Only directories
    /// named after this issuer count; the issuer log and foreign entries are
    /// left out.
    pub fn staging_dirs(&self) -> Result<Vec<PathBuf>> {
        let cache = self.updates_cache_dir();
        let entries = match fs::read_dir(&cache) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::io(format!("failed to read {}", cache.display()), err));
            }
        };

        let prefix = format!("{}-", self.issuer_name());
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("failed to read {}", cache.display()))?;
            let is_dir = entry.file_type().is_ok_and(|kind| kind.is_dir());
            let named = entry.file_name().to_string_lossy().starts_with(&prefix);
            if is_dir && named {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Removes a staging directory, refusing anything outside the updates
    /// cache. `Ok(false)` when nothing was removed.
    pub fn remove_update_dir(&self, update_dir: &Path) -> Result<bool> {
        if update_dir.as_os_str().is_empty() || !update_dir.starts_with(self.updates_cache_dir()) {
            tracing::warn!(
                update_dir = %update_dir.display(),
                cache = %self.updates_cache_dir().display(),
                "refusing to remove staging directory outside the updates cache"
            );
            return Ok(false);
        }
        remove_dir_if_exists(update_dir)
            .io_context(|| format!("failed to remove {}", update_dir.display()))
    }
}
