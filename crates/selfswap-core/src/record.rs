use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fs_utils::{append_to_file_name, ensure_exe_ext};

pub const UPDATE_RECORD_EXT: &str = ".selfupdate";
pub const UPDATES_CACHE_DIR_NAME: &str = "selfupdate";
pub const UPDATE_ARCHIVE_NAME: &str = "update";
pub const UPTOOL_EXE_NAME: &str = "uptool";
pub const HANDOFF_FILE_NAME: &str = "selfupdate";
pub const UPTOOL_LOG_NAME: &str = "uptool.log";
pub const BACKUP_SUFFIX: &str = ".bak";

/// Pending update, persisted beside the issuer executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub update_dir: PathBuf,
    pub update_version: String,
    pub issuer_version: String,
    pub start_after_update: bool,
    pub update_attempt: u32,
}

impl UpdateRecord {
    pub fn archive_path(&self) -> PathBuf {
        self.update_dir.join(UPDATE_ARCHIVE_NAME)
    }

    pub fn uptool_path(&self) -> PathBuf {
        self.update_dir.join(uptool_file_name())
    }

    pub fn handoff_path(&self) -> PathBuf {
        handoff_path(&self.update_dir)
    }
}

/// Instructions for the uptool, persisted inside the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub target_dir: PathBuf,
    pub issuer_exe: PathBuf,
    pub start_after_update: bool,
    pub update_record_path: PathBuf,
    pub issuer_entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub unlock_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl HandoffRecord {
    pub fn backup_path(&self) -> PathBuf {
        append_to_file_name(&self.issuer_exe, BACKUP_SUFFIX)
    }
}

pub fn uptool_file_name() -> String {
    ensure_exe_ext(UPTOOL_EXE_NAME)
}

pub fn handoff_path(update_dir: &Path) -> PathBuf {
    update_dir.join(HANDOFF_FILE_NAME)
}
