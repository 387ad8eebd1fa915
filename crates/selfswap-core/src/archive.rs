use std::fs;
use std::io;
use std::path::Path;

use zip::result::ZipError;
use zip::ZipArchive;

use crate::{Error, IoResultExt, Result};

/// Extracts the single entry `entry_name` from the zip at `archive_path` to
/// `dest`, creating parent directories and applying the entry's unix mode.
pub fn extract_entry(archive_path: &Path, entry_name: &str, dest: &Path) -> Result<()> {
    let mut archive = open_archive(archive_path)?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(Error::EntryNotFound {
                archive: archive_path.to_path_buf(),
                entry: entry_name.to_string(),
            });
        }
        Err(err) => {
            return Err(zip_error(
                format!(
                    "failed to read entry '{entry_name}' from {}",
                    archive_path.display()
                ),
                err,
            ));
        }
    };

    if entry.is_dir() {
        return fs::create_dir_all(dest)
            .io_context(|| format!("failed to create {}", dest.display()));
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .io_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut out =
        fs::File::create(dest).io_context(|| format!("failed to create {}", dest.display()))?;
    io::copy(&mut entry, &mut out).io_context(|| {
        format!(
            "failed to extract '{entry_name}' from {} to {}",
            archive_path.display(),
            dest.display()
        )
    })?;
    out.sync_all()
        .io_context(|| format!("failed to flush {}", dest.display()))?;
    drop(out);

    #[cfg(unix)]
    if let Some(mode) = entry.unix_mode() {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(dest, fs::Permissions::from_mode(mode & 0o7777))
            .io_context(|| format!("failed to set mode on {}", dest.display()))?;
    }

    tracing::debug!(
        archive = %archive_path.display(),
        entry = entry_name,
        dest = %dest.display(),
        "extracted archive entry"
    );
    Ok(())
}

pub fn entry_names(archive_path: &Path) -> Result<Vec<String>> {
    let archive = open_archive(archive_path)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

pub fn contains_entry(archive_path: &Path, entry_name: &str) -> Result<bool> {
    let archive = open_archive(archive_path)?;
    let found = archive.file_names().any(|name| name == entry_name);
    Ok(found)
}

fn open_archive(archive_path: &Path) -> Result<ZipArchive<fs::File>> {
    let file = fs::File::open(archive_path)
        .io_context(|| format!("failed to open {}", archive_path.display()))?;
    ZipArchive::new(file).map_err(|err| {
        zip_error(
            format!("failed to read zip archive {}", archive_path.display()),
            err,
        )
    })
}

fn zip_error(context: String, err: ZipError) -> Error {
    let source = match err {
        ZipError::Io(source) => source,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    };
    Error::io(context, source)
}
