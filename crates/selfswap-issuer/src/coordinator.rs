use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use selfswap_core::{
    state, DetachedLauncher, Error, HandoffRecord, IoResultExt, Launcher, Result, UpdateRecord,
    Version, UPDATE_ARCHIVE_NAME,
};

use crate::{AttemptLock, CoordinatorConfig, IssuerLayout, UpdateSink};

/// Exit code for an issuer that stops because the uptool is about to replace
/// it.
pub const EXIT_CODE_REPLACING: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueReason {
    NoPendingUpdate,
    /// Another issuer instance is inside its own startup check.
    LockBusy,
    CorruptState,
    StaleVersion,
    AttemptsExhausted,
    StateUnreadable,
    LaunchFailed,
}

impl ContinueReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPendingUpdate => "no pending update",
            Self::LockBusy => "update lock busy",
            Self::CorruptState => "corrupt update record discarded",
            Self::StaleVersion => "pending update is not newer",
            Self::AttemptsExhausted => "update attempts exhausted",
            Self::StateUnreadable => "update state unreadable",
            Self::LaunchFailed => "uptool launch failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Continue(ContinueReason),
    /// The uptool is running; the caller must exit without running any more
    /// application code.
    MustExit { update_dir: PathBuf, attempt: u32 },
}

impl CheckOutcome {
    pub fn must_exit(&self) -> bool {
        matches!(self, Self::MustExit { .. })
    }
}

/// Issuer half of the self-update protocol.
#[derive(Debug)]
pub struct UpdateCoordinator<L = DetachedLauncher> {
    layout: IssuerLayout,
    config: CoordinatorConfig,
    launcher: L,
}

impl UpdateCoordinator<DetachedLauncher> {
    pub fn new(layout: IssuerLayout, config: CoordinatorConfig) -> Self {
        Self::with_launcher(layout, config, DetachedLauncher)
    }
}

impl<L: Launcher> UpdateCoordinator<L> {
    pub fn with_launcher(layout: IssuerLayout, config: CoordinatorConfig, launcher: L) -> Self {
        Self {
            layout,
            config,
            launcher,
        }
    }

    pub fn layout(&self) -> &IssuerLayout {
        &self.layout
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Startup check. Must run before any application logic on every start;
    /// it is what resumes an interrupted update. Never fails: every problem
    /// resolves to continuing normally.
    pub fn check_update_ready(&self) -> CheckOutcome {
        tracing::debug!(issuer = %self.layout.issuer_exe().display(), "checking for pending update");
        let record_path = self.layout.update_record_path();

        // Unlocked look first so the common case never touches the lock.
        match state::load::<UpdateRecord>(&record_path) {
            Err(err) if err.is_not_found() => {
                tracing::debug!("update is not necessary");
                self.sweep_update_cache(None);
                return CheckOutcome::Continue(ContinueReason::NoPendingUpdate);
            }
            _ => {}
        }

        let _lock = match AttemptLock::acquire(&self.layout.lock_path()) {
            Ok(lock) => lock,
            Err(Error::LockBusy { path }) => {
                tracing::info!(lock = %path.display(), "another instance holds the update lock");
                return CheckOutcome::Continue(ContinueReason::LockBusy);
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot lock update state");
                return CheckOutcome::Continue(ContinueReason::StateUnreadable);
            }
        };

        let mut record = match state::load::<UpdateRecord>(&record_path) {
            Ok(record) => record,
            Err(err) if err.is_not_found() => {
                self.sweep_update_cache(None);
                return CheckOutcome::Continue(ContinueReason::NoPendingUpdate);
            }
            Err(err @ Error::CorruptState { .. }) => {
                tracing::warn!(error = %err, "discarding corrupt update record");
                if let Err(err) = state::remove(&record_path) {
                    tracing::warn!(error = %err, "failed to remove corrupt update record");
                }
                // The record named the staging dir; without it the dir is
                // only reachable through the sweep.
                self.sweep_update_cache(None);
                return CheckOutcome::Continue(ContinueReason::CorruptState);
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot read update record");
                return CheckOutcome::Continue(ContinueReason::StateUnreadable);
            }
        };

        if let Some(reason) = self.decline_reason(&record) {
            tracing::info!(
                version = %record.update_version,
                attempt = record.update_attempt,
                reason = reason.as_str(),
                "discarding pending update"
            );
            self.discard(&record);
            self.sweep_update_cache(None);
            return CheckOutcome::Continue(reason);
        }

        record.update_attempt += 1;
        if let Err(err) = state::save(&record, &record_path) {
            tracing::warn!(error = %err, "cannot persist update attempt; skipping handoff");
            return CheckOutcome::Continue(ContinueReason::StateUnreadable);
        }

        self.sweep_update_cache(Some(&record.update_dir));
        match self.hand_off(&record) {
            Ok(()) => {
                tracing::info!(
                    version = %record.update_version,
                    attempt = record.update_attempt,
                    update_dir = %record.update_dir.display(),
                    "uptool started; issuer must exit"
                );
                CheckOutcome::MustExit {
                    update_dir: record.update_dir,
                    attempt: record.update_attempt,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, attempt = record.update_attempt, "handoff failed");
                CheckOutcome::Continue(ContinueReason::LaunchFailed)
            }
        }
    }

    /// Exit hook. Runs the startup check again as the issuer shuts down, so
    /// an update staged during this run is applied now rather than on the
    /// next start. On `MustExit` the uptool is already waiting for this
    /// process to go away.
    pub fn apply_on_exit(&self) -> CheckOutcome {
        tracing::debug!("checking for pending update before exit");
        self.check_update_ready()
    }

    /// Removes staging directories that no pending update refers to:
    /// leftovers of finished updates, of discarded corrupt records and of
    /// crashed downloads. Directories used within `staging_grace` stay, as
    /// they may belong to a download still in progress. Returns how many
    /// were removed.
    pub fn sweep_update_cache(&self, keep: Option<&Path>) -> usize {
        let dirs = match self.layout.staging_dirs() {
            Ok(dirs) => dirs,
            Err(err) => {
                tracing::warn!(error = %err, "cannot list updates cache");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for dir in dirs {
            if keep == Some(dir.as_path()) {
                continue;
            }
            if !idle_for(&dir, now, self.config.staging_grace) {
                tracing::debug!(
                    update_dir = %dir.display(),
                    "keeping recently used staging directory"
                );
                continue;
            }
            match self.layout.remove_update_dir(&dir) {
                Ok(true) => {
                    tracing::info!(
                        update_dir = %dir.display(),
                        "removed leftover staging directory"
                    );
                    removed += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        update_dir = %dir.display(),
                        error = %err,
                        "failed to remove leftover staging directory"
                    );
                }
            }
        }
        removed
    }

    /// Opens a staging directory for `version` and returns the sink the
    /// downloaded archive is written into.
    pub fn begin_update(&self, version: &Version, start_after_update: bool) -> Result<UpdateSink> {
        version.parse()?;
        let update_dir = self.layout.fresh_update_dir(version)?;
        tracing::info!(
            version = %version,
            update_dir = %update_dir.display(),
            "preparing update"
        );

        let record = UpdateRecord {
            update_dir: update_dir.clone(),
            update_version: version.as_str().trim().to_string(),
            issuer_version: self.config.version.as_str().to_string(),
            start_after_update,
            update_attempt: 0,
        };

        fs::create_dir_all(&update_dir)
            .io_context(|| format!("failed to create {}", update_dir.display()))?;
        let archive = match fs::File::create(record.archive_path()) {
            Ok(file) => file,
            Err(err) => {
                let _ = self.layout.remove_update_dir(&update_dir);
                return Err(Error::io(
                    format!("failed to create {}", record.archive_path().display()),
                    err,
                ));
            }
        };

        let handoff = self.handoff_for(&record);
        Ok(UpdateSink::new(self.layout.clone(), record, handoff, archive))
    }

    pub fn pending_update(&self) -> Result<Option<UpdateRecord>> {
        match state::load::<UpdateRecord>(&self.layout.update_record_path()) {
            Ok(record) => Ok(Some(record)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Drops the pending update and its staging directory, if any.
    pub fn discard_pending_update(&self) -> Result<bool> {
        let _lock = AttemptLock::acquire(&self.layout.lock_path())?;
        let record_path = self.layout.update_record_path();
        let record = match state::load::<UpdateRecord>(&record_path) {
            Ok(record) => Some(record),
            Err(err) if err.is_not_found() => return Ok(false),
            Err(Error::CorruptState { .. }) => None,
            Err(err) => return Err(err),
        };

        state::remove(&record_path)?;
        if let Some(record) = record {
            self.layout.remove_update_dir(&record.update_dir)?;
        }
        Ok(true)
    }

    fn decline_reason(&self, record: &UpdateRecord) -> Option<ContinueReason> {
        let pending = Version::new(record.update_version.as_str());
        match pending.is_greater(&self.config.version) {
            Ok(true) => {}
            Ok(false) => return Some(ContinueReason::StaleVersion),
            Err(err) => {
                tracing::warn!(error = %err, "cannot compare pending update version");
                return Some(ContinueReason::StaleVersion);
            }
        }

        if record.update_attempt >= self.config.max_update_attempts {
            return Some(ContinueReason::AttemptsExhausted);
        }
        None
    }

    fn discard(&self, record: &UpdateRecord) {
        if let Err(err) = state::remove(&self.layout.update_record_path()) {
            tracing::warn!(error = %err, "failed to remove update record");
        }
        if let Err(err) = self.layout.remove_update_dir(&record.update_dir) {
            tracing::warn!(error = %err, "failed to remove staging directory");
        }
    }

    fn hand_off(&self, record: &UpdateRecord) -> Result<()> {
        // The uptool deletes the handoff at the end of every run, so each
        // attempt gets a fresh one.
        state::save(&self.handoff_for(record), &record.handoff_path())?;

        let args = [
            OsString::from("--update-dir"),
            record.update_dir.clone().into_os_string(),
        ];
        self.launcher.launch_detached(&record.uptool_path(), &args)
    }

    fn handoff_for(&self, record: &UpdateRecord) -> HandoffRecord {
        HandoffRecord {
            target_dir: self.layout.issuer_dir(),
            issuer_exe: self.layout.issuer_exe().to_path_buf(),
            start_after_update: record.start_after_update,
            update_record_path: self.layout.update_record_path(),
            issuer_entry: self.layout.issuer_file_name(),
            service_name: self.config.service_name.clone(),
            unlock_timeout_ms: duration_millis(self.config.unlock_timeout),
            poll_interval_ms: duration_millis(self.config.poll_interval),
        }
    }
}

/// Neither the directory nor the archive inside it changed within `grace`.
/// Unreadable timestamps count as recent.
fn idle_for(dir: &Path, now: SystemTime, grace: Duration) -> bool {
    let Some(dir_modified) = modified(dir) else {
        return false;
    };
    let newest = modified(&dir.join(UPDATE_ARCHIVE_NAME))
        .map_or(dir_modified, |archive| archive.max(dir_modified));
    now.duration_since(newest).unwrap_or(Duration::ZERO) >= grace
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn duration_millis(duration: Duration) -> u64 {
    // TOML integers are signed.
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .min(i64::MAX as u64)
}
