mod archive;
mod error;
mod fs_utils;
mod launch;
mod record;
mod store;
mod version;

pub use archive::{contains_entry, entry_names, extract_entry};
pub use error::{Error, IoResultExt, Result};
pub use fs_utils::{
    append_to_file_name, ensure_exe_ext, remove_dir_if_exists, remove_file_if_exists,
    trim_exe_ext,
};
pub use launch::{DetachedLauncher, Launcher};
pub use record::{
    handoff_path, uptool_file_name, HandoffRecord, UpdateRecord, BACKUP_SUFFIX,
    HANDOFF_FILE_NAME, UPDATES_CACHE_DIR_NAME, UPDATE_ARCHIVE_NAME, UPDATE_RECORD_EXT,
    UPTOOL_EXE_NAME, UPTOOL_LOG_NAME,
};
pub use store::PersistedRecord;
pub use version::Version;

/// Persisted State Store: durable records beside the issuer and in the
/// staging directory.
pub mod state {
    pub use crate::store::{load, remove, save};
}

#[cfg(test)]
mod tests;
