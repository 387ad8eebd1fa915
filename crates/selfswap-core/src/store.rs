use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::fs_utils::{append_to_file_name, remove_file_if_exists};
use crate::record::{HandoffRecord, UpdateRecord};
use crate::{Error, IoResultExt, Result};

/// A record kind with its own fixed on-disk schema.
pub trait PersistedRecord: Serialize + DeserializeOwned {
    const KIND: &'static str;
    const SCHEMA: u32;
}

impl PersistedRecord for UpdateRecord {
    const KIND: &'static str = "update";
    const SCHEMA: u32 = 1;
}

impl PersistedRecord for HandoffRecord {
    const KIND: &'static str = "handoff";
    const SCHEMA: u32 = 1;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, R> {
    kind: &'a str,
    schema: u32,
    record: &'a R,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope<R> {
    kind: String,
    schema: u32,
    record: R,
}

/// Writes `record` to `path` through a sibling temp file and a rename, so a
/// reader never observes a partially written record.
pub fn save<R: PersistedRecord>(record: &R, path: &Path) -> Result<()> {
    let payload = serialize_record(record).map_err(|err| {
        Error::io(
            format!("failed to serialize {} record", R::KIND),
            io::Error::new(io::ErrorKind::InvalidData, err),
        )
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .io_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp_path = append_to_file_name(path, &format!(".tmp-{}", std::process::id()));
    let written = write_synced(&tmp_path, payload.as_bytes())
        .io_context(|| format!("failed to write {}", tmp_path.display()))
        .and_then(|()| {
            fs::rename(&tmp_path, path).io_context(|| {
                format!(
                    "failed to move {} into place at {}",
                    tmp_path.display(),
                    path.display()
                )
            })
        });
    if written.is_err() {
        let _ = remove_file_if_exists(&tmp_path);
    }
    written?;

    tracing::debug!(kind = R::KIND, path = %path.display(), "saved record");
    Ok(())
}

pub fn load<R: PersistedRecord>(path: &Path) -> Result<R> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            return Err(corrupt(path, format!("not valid UTF-8: {err}")));
        }
        Err(err) => {
            return Err(Error::io(
                format!("failed to read {}", path.display()),
                err,
            ));
        }
    };

    parse_record(&raw).map_err(|reason| corrupt(path, reason))
}

/// Removes a persisted record; `Ok(false)` when there was nothing to remove.
pub fn remove(path: &Path) -> Result<bool> {
    remove_file_if_exists(path).io_context(|| format!("failed to remove {}", path.display()))
}

pub(crate) fn serialize_record<R: PersistedRecord>(
    record: &R,
) -> std::result::Result<String, toml::ser::Error> {
    toml::to_string(&EnvelopeRef {
        kind: R::KIND,
        schema: R::SCHEMA,
        record,
    })
}

pub(crate) fn parse_record<R: PersistedRecord>(raw: &str) -> std::result::Result<R, String> {
    let envelope: Envelope<R> = toml::from_str(raw).map_err(|err| err.to_string())?;
    if envelope.kind != R::KIND {
        return Err(format!(
            "expected a '{}' record, found '{}'",
            R::KIND,
            envelope.kind
        ));
    }
    if envelope.schema != R::SCHEMA {
        return Err(format!(
            "unsupported {} schema {} (expected {})",
            R::KIND,
            envelope.schema,
            R::SCHEMA
        ));
    }
    Ok(envelope.record)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn corrupt(path: &Path, reason: String) -> Error {
    Error::CorruptState {
        path: path.to_path_buf(),
        reason,
    }
}
