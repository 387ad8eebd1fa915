use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    /// The state file is absent. Callers treat this as "nothing pending".
    #[error("state file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("corrupt state file {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("update archive {} has no '{helper}' entry", archive.display())]
    MissingHelperExecutable { archive: PathBuf, helper: String },

    #[error("archive {} has no entry named '{entry}'", archive.display())]
    EntryNotFound { archive: PathBuf, entry: String },

    #[error(
        "{} did not become replaceable within {}ms",
        target.display(),
        waited.as_millis()
    )]
    UnlockTimeout { target: PathBuf, waited: Duration },

    #[error("update lock is held by another process: {}", path.display())]
    LockBusy { path: PathBuf },

    #[error("service '{name}' {action} failed: {detail}")]
    Service {
        name: String,
        action: &'static str,
        detail: String,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// `anyhow::Context`-style adapter for raw I/O results.
pub trait IoResultExt<T> {
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn io_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::io(context(), source))
    }
}
