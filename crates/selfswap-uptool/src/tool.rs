use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use selfswap_core::{
    extract_entry, handoff_path, remove_file_if_exists, state, DetachedLauncher, Error,
    HandoffRecord, IoResultExt, Launcher, Result, UPDATE_ARCHIVE_NAME,
};

use crate::{Clock, ServiceControl, SystemClock, SystemServiceControl};

pub const EXIT_SUCCESS: i32 = 0;
/// The update failed and the original executable was put back.
pub const EXIT_ROLLED_BACK: i32 = 1;
/// The handoff record could not be read; nothing was touched.
pub const EXIT_FATAL: i32 = 2;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Where the replacement executable bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceSource {
    ArchiveEntry { archive: PathBuf, entry: String },
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    Success,
    Failure,
}

/// Helper-side half of the self-update protocol.
///
/// Exactly one of [`ReplaceTool::finalize_success`] and
/// [`ReplaceTool::finalize_failure`] runs per tool. If neither has run when
/// the tool is dropped (early return, panic), the failure path runs from
/// `Drop` and the original executable is restored.
pub struct ReplaceTool<
    C: Clock = SystemClock,
    L: Launcher = DetachedLauncher,
    S: ServiceControl = SystemServiceControl,
> {
    update_dir: PathBuf,
    handoff: HandoffRecord,
    clock: C,
    launcher: L,
    services: S,
    poll_interval: Duration,
    /// The original executable sits at the backup path.
    target_removed: bool,
    /// The replacement was fully written to the target path.
    target_replaced: bool,
    service_stopped: bool,
    finalized: Option<Finalized>,
}

impl<C: Clock, L: Launcher, S: ServiceControl> ReplaceTool<C, L, S> {
    pub fn open(update_dir: &Path, clock: C, launcher: L, services: S) -> Result<Self> {
        let handoff: HandoffRecord = state::load(&handoff_path(update_dir))?;
        let poll_interval = Duration::from_millis(handoff.poll_interval_ms).max(MIN_POLL_INTERVAL);
        Ok(Self {
            update_dir: update_dir.to_path_buf(),
            handoff,
            clock,
            launcher,
            services,
            poll_interval,
            target_removed: false,
            target_replaced: false,
            service_stopped: false,
            finalized: None,
        })
    }

    pub fn handoff(&self) -> &HandoffRecord {
        &self.handoff
    }

    pub fn update_dir(&self) -> &Path {
        &self.update_dir
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn unlock_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff.unlock_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
    }

    pub fn target_removed(&self) -> bool {
        self.target_removed
    }

    pub fn target_replaced(&self) -> bool {
        self.target_replaced
    }

    pub fn finalized(&self) -> Option<Finalized> {
        self.finalized
    }

    /// The issuer's entry in the staged archive.
    pub fn archive_source(&self) -> ReplaceSource {
        ReplaceSource::ArchiveEntry {
            archive: self.update_dir.join(UPDATE_ARCHIVE_NAME),
            entry: self.handoff.issuer_entry.clone(),
        }
    }

    /// Runs the whole helper sequence and returns the process exit code.
    pub fn run(&mut self, unlock_timeout: Duration) -> i32 {
        tracing::info!(
            update_dir = %self.update_dir.display(),
            target = %self.handoff.issuer_exe.display(),
            start_after_update = self.handoff.start_after_update,
            "uptool started"
        );
        self.stop_service();

        if !self.wait_remove_target(unlock_timeout) {
            let err = Error::UnlockTimeout {
                target: self.handoff.issuer_exe.clone(),
                waited: unlock_timeout,
            };
            tracing::error!(error = %err, "giving up on update");
            return self.finalize_failure();
        }

        let source = self.archive_source();
        match self.replace_target(&source) {
            Ok(()) => self.finalize_success(),
            Err(err) => {
                tracing::error!(error = %err, "failed to write replacement executable");
                self.finalize_failure()
            }
        }
    }

    pub fn stop_service(&mut self) {
        let Some(name) = self.handoff.service_name.clone() else {
            return;
        };
        match self.services.stop(&name) {
            Ok(()) => self.service_stopped = true,
            Err(err) => tracing::warn!(error = %err, "failed to stop service; waiting anyway"),
        }
    }

    /// Moves the target executable to its backup path once nothing holds it
    /// open. Returns `false` when it stayed locked for `timeout`.
    pub fn wait_remove_target(&mut self, timeout: Duration) -> bool {
        if self.target_removed {
            return true;
        }

        let target = self.handoff.issuer_exe.clone();
        let backup = self.handoff.backup_path();
        let started = self.clock.now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if !target.exists() {
                if backup.exists() {
                    // An earlier run moved it and died before finishing.
                    tracing::info!(
                        backup = %backup.display(),
                        "target already moved aside by a previous run"
                    );
                    self.target_removed = true;
                    return true;
                }
                tracing::error!(target = %target.display(), "target executable is missing");
                return false;
            }

            if let Err(err) = remove_file_if_exists(&backup) {
                tracing::debug!(backup = %backup.display(), error = %err, "cannot remove stale backup");
            }
            match fs::rename(&target, &backup) {
                Ok(()) => {
                    tracing::info!(
                        target = %target.display(),
                        backup = %backup.display(),
                        attempts,
                        "target unlocked and moved aside"
                    );
                    self.target_removed = true;
                    return true;
                }
                Err(err) => {
                    tracing::debug!(target = %target.display(), error = %err, "target still locked");
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed >= timeout {
                tracing::warn!(
                    target = %target.display(),
                    waited_ms = elapsed.as_millis() as u64,
                    attempts,
                    "target never became replaceable"
                );
                return false;
            }
            self.clock.sleep(self.poll_interval);
        }
    }

    /// Writes the new executable into the vacated target path with the
    /// original's permission bits.
    pub fn replace_target(&mut self, source: &ReplaceSource) -> Result<()> {
        let target = self.handoff.issuer_exe.clone();
        let backup = self.handoff.backup_path();
        if !self.target_removed {
            return Err(Error::io(
                format!(
                    "refusing to replace {}: original is not backed up",
                    target.display()
                ),
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }

        let permissions = fs::metadata(&backup)
            .io_context(|| format!("failed to read metadata for {}", backup.display()))?
            .permissions();

        match source {
            ReplaceSource::ArchiveEntry { archive, entry } => {
                extract_entry(archive, entry, &target)?;
            }
            ReplaceSource::File(path) => copy_file(path, &target)?,
        }
        fs::set_permissions(&target, permissions)
            .io_context(|| format!("failed to set permissions on {}", target.display()))?;

        self.target_replaced = true;
        tracing::info!(target = %target.display(), "replacement executable written");
        Ok(())
    }

    /// Puts the original executable back if this run moved it aside. Safe to
    /// call any number of times.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.target_removed {
            return Ok(());
        }

        let target = self.handoff.issuer_exe.clone();
        let backup = self.handoff.backup_path();
        if !backup.exists() {
            tracing::warn!(backup = %backup.display(), "backup is gone; nothing to restore");
            self.target_removed = false;
            self.target_replaced = false;
            return Ok(());
        }

        if remove_file_if_exists(&target)
            .io_context(|| format!("failed to remove partial {}", target.display()))?
        {
            tracing::info!(target = %target.display(), "removed partial replacement");
        }
        fs::rename(&backup, &target).io_context(|| {
            format!(
                "failed to restore {} from {}",
                target.display(),
                backup.display()
            )
        })?;

        self.target_removed = false;
        self.target_replaced = false;
        tracing::info!(target = %target.display(), "original executable restored");
        Ok(())
    }

    pub fn finalize_success(&mut self) -> i32 {
        if self.finalized.is_some() {
            return self.exit_code();
        }
        if !self.target_replaced {
            tracing::error!("success requested before the target was replaced");
            return self.finalize_failure();
        }
        self.finalized = Some(Finalized::Success);

        if let Err(err) = state::remove(&self.handoff.update_record_path) {
            tracing::warn!(error = %err, "failed to remove update record");
        }
        let backup = self.handoff.backup_path();
        self.remove_quietly(&backup, "backup");
        self.remove_quietly(&handoff_path(&self.update_dir), "handoff record");
        self.remove_quietly(&self.update_dir.join(UPDATE_ARCHIVE_NAME), "update archive");

        self.start_issuer();
        tracing::info!(target = %self.handoff.issuer_exe.display(), "update finished");
        EXIT_SUCCESS
    }

    pub fn finalize_failure(&mut self) -> i32 {
        if self.finalized.is_some() {
            return self.exit_code();
        }
        self.finalized = Some(Finalized::Failure);

        if let Err(err) = self.rollback() {
            tracing::error!(error = %err, "rollback failed");
        }
        self.remove_quietly(&handoff_path(&self.update_dir), "handoff record");

        self.start_issuer();
        tracing::info!(target = %self.handoff.issuer_exe.display(), "update rolled back");
        EXIT_ROLLED_BACK
    }

    fn exit_code(&self) -> i32 {
        match self.finalized {
            Some(Finalized::Success) => EXIT_SUCCESS,
            _ => EXIT_ROLLED_BACK,
        }
    }

    /// Restarts whatever is now at the target path. A service stopped by this
    /// run is always started again.
    fn start_issuer(&self) {
        if let Some(name) = &self.handoff.service_name {
            if self.service_stopped || self.handoff.start_after_update {
                if let Err(err) = self.services.start(name) {
                    tracing::error!(error = %err, "failed to start service");
                }
            }
            return;
        }
        if !self.handoff.start_after_update {
            return;
        }
        if let Err(err) = self.launcher.launch_detached(&self.handoff.issuer_exe, &[]) {
            tracing::error!(error = %err, "failed to relaunch issuer");
        }
    }

    fn remove_quietly(&self, path: &Path, what: &str) {
        if let Err(err) = remove_file_if_exists(path) {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove {what}");
        }
    }
}

impl<C: Clock, L: Launcher, S: ServiceControl> Drop for ReplaceTool<C, L, S> {
    fn drop(&mut self) {
        if self.finalized.is_none() {
            tracing::error!("uptool exiting without finalizing; rolling back");
            self.finalize_failure();
        }
    }
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let mut input =
        fs::File::open(source).io_context(|| format!("failed to open {}", source.display()))?;
    let mut output =
        fs::File::create(dest).io_context(|| format!("failed to create {}", dest.display()))?;
    io::copy(&mut input, &mut output).io_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    output
        .sync_all()
        .io_context(|| format!("failed to flush {}", dest.display()))
}
