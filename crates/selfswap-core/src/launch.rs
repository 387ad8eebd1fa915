use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::{IoResultExt, Result};

/// Starts a process that outlives the caller.
///
/// Both halves of the protocol end by handing control to another process and
/// exiting, so this is the one place where platform process semantics live.
pub trait Launcher {
    fn launch_detached(&self, program: &Path, args: &[OsString]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch_detached(&self, program: &Path, args: &[OsString]) -> Result<()> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = program.parent().filter(|p| !p.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        detach(&mut command);

        let child = command
            .spawn()
            .io_context(|| format!("failed to launch {}", program.display()))?;
        tracing::info!(
            program = %program.display(),
            pid = child.id(),
            "launched detached process"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
