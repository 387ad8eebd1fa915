use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use selfswap_core::{
    contains_entry, extract_entry, state, uptool_file_name, Error, HandoffRecord, IoResultExt,
    Result, UpdateRecord,
};

use crate::{AttemptLock, IssuerLayout};

const COMMIT_LOCK_ATTEMPTS: u32 = 20;
const COMMIT_LOCK_DELAY: Duration = Duration::from_millis(50);

/// Byte sink for a downloaded update archive.
///
/// Bytes go straight into the staging directory. [`UpdateSink::finish`]
/// closes the archive and commits the update; dropping the sink without a
/// successful `finish` removes everything it staged.
pub struct UpdateSink {
    layout: IssuerLayout,
    record: UpdateRecord,
    handoff: HandoffRecord,
    archive: Option<BufWriter<File>>,
    bytes_written: u64,
    committed: bool,
}

impl UpdateSink {
    pub(crate) fn new(
        layout: IssuerLayout,
        record: UpdateRecord,
        handoff: HandoffRecord,
        archive: File,
    ) -> Self {
        Self {
            layout,
            record,
            handoff,
            archive: Some(BufWriter::new(archive)),
            bytes_written: 0,
            committed: false,
        }
    }

    pub fn update_dir(&self) -> &Path {
        &self.record.update_dir
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn finish(mut self) -> Result<UpdateRecord> {
        let result = self.commit();
        if let Err(err) = &result {
            tracing::error!(
                update_dir = %self.record.update_dir.display(),
                error = %err,
                "staging update failed"
            );
        }
        result
    }

    fn commit(&mut self) -> Result<UpdateRecord> {
        let archive_path = self.record.archive_path();
        let writer = self.archive.take().ok_or_else(|| {
            Error::io(
                format!("update archive {} already closed", archive_path.display()),
                io::Error::from(io::ErrorKind::BrokenPipe),
            )
        })?;
        let file = writer.into_inner().map_err(|err| {
            Error::io(
                format!("failed to flush {}", archive_path.display()),
                err.into_error(),
            )
        })?;
        file.sync_all()
            .io_context(|| format!("failed to sync {}", archive_path.display()))?;
        drop(file);
        tracing::info!(
            archive = %archive_path.display(),
            bytes = self.bytes_written,
            "update archive closed"
        );

        if !contains_entry(&archive_path, &self.handoff.issuer_entry)? {
            return Err(Error::EntryNotFound {
                archive: archive_path,
                entry: self.handoff.issuer_entry.clone(),
            });
        }

        let helper = uptool_file_name();
        extract_entry(&archive_path, &helper, &self.record.uptool_path()).map_err(
            |err| match err {
                Error::EntryNotFound { archive, entry } => Error::MissingHelperExecutable {
                    archive,
                    helper: entry,
                },
                other => other,
            },
        )?;

        state::save(&self.handoff, &self.record.handoff_path())?;

        let record_path = self.layout.update_record_path();
        let _lock = AttemptLock::acquire_with_retry(
            &self.layout.lock_path(),
            COMMIT_LOCK_ATTEMPTS,
            COMMIT_LOCK_DELAY,
        )?;
        let previous = match state::load::<UpdateRecord>(&record_path) {
            Ok(previous) => Some(previous),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                tracing::warn!(error = %err, "replacing unreadable update record");
                None
            }
        };

        // The update record is the commit point: once it exists the next
        // issuer start will act on this staging directory.
        state::save(&self.record, &record_path)?;
        self.committed = true;
        tracing::info!(
            version = %self.record.update_version,
            update_dir = %self.record.update_dir.display(),
            "update staged"
        );

        if let Some(previous) = previous {
            if previous.update_dir != self.record.update_dir {
                if let Err(err) = self.layout.remove_update_dir(&previous.update_dir) {
                    tracing::warn!(error = %err, "failed to remove superseded staging directory");
                }
            }
        }

        Ok(self.record.clone())
    }
}

impl Write for UpdateSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .archive
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        let written = writer.write(buf)?;
        self.bytes_written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.archive.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for UpdateSink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.archive.take());
        match self.layout.remove_update_dir(&self.record.update_dir) {
            Ok(_) => tracing::info!(
                update_dir = %self.record.update_dir.display(),
                "removed incomplete staging directory"
            ),
            Err(err) => tracing::warn!(
                update_dir = %self.record.update_dir.display(),
                error = %err,
                "failed to remove incomplete staging directory"
            ),
        }
    }
}
