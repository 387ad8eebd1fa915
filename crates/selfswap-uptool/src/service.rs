use std::process::Command;

use selfswap_core::{Error, Result};

/// Stops and starts the managed service wrapping the issuer, when there is
/// one.
pub trait ServiceControl {
    fn stop(&self, name: &str) -> Result<()>;
    fn start(&self, name: &str) -> Result<()>;
}

/// Drives the host service manager: `systemctl` on Linux, `launchctl` on
/// macOS, `sc` on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemServiceControl;

impl ServiceControl for SystemServiceControl {
    fn stop(&self, name: &str) -> Result<()> {
        run_service_command(name, "stop", &mut service_command(name, "stop"))
    }

    fn start(&self, name: &str) -> Result<()> {
        run_service_command(name, "start", &mut service_command(name, "start"))
    }
}

#[cfg(target_os = "linux")]
fn service_command(name: &str, action: &str) -> Command {
    let mut command = Command::new("systemctl");
    command.arg(action).arg(name);
    command
}

#[cfg(target_os = "macos")]
fn service_command(name: &str, action: &str) -> Command {
    let mut command = Command::new("launchctl");
    command.arg(action).arg(name);
    command
}

#[cfg(windows)]
fn service_command(name: &str, action: &str) -> Command {
    let mut command = Command::new("sc");
    command.arg(action).arg(name);
    command
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn service_command(name: &str, action: &str) -> Command {
    let mut command = Command::new("service");
    command.arg(name).arg(action);
    command
}

fn run_service_command(name: &str, action: &'static str, command: &mut Command) -> Result<()> {
    let output = command.output().map_err(|err| Error::Service {
        name: name.to_string(),
        action,
        detail: format!("command failed to start: {err}"),
    })?;
    if output.status.success() {
        tracing::info!(service = name, action, "service command succeeded");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(Error::Service {
        name: name.to_string(),
        action,
        detail: format!(
            "status={} stdout='{}' stderr='{}'",
            output.status,
            stdout.trim(),
            stderr.trim()
        ),
    })
}
