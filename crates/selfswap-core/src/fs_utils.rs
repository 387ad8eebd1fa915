use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Strips a trailing `.exe` on Windows; identity elsewhere.
pub fn trim_exe_ext(path: &Path) -> PathBuf {
    if cfg!(windows) {
        if let Some(raw) = path.to_str() {
            if let Some(stripped) = raw.strip_suffix(".exe") {
                return PathBuf::from(stripped);
            }
        }
    }
    path.to_path_buf()
}

pub fn ensure_exe_ext(name: &str) -> String {
    if cfg!(windows) && !name.ends_with(".exe") {
        return format!("{name}.exe");
    }
    name.to_string()
}

/// Appends `suffix` to the final path component without treating it as an
/// extension (`app.exe` + `.bak` = `app.exe.bak`).
pub fn append_to_file_name(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
