use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use selfswap_core::{DetachedLauncher, UPTOOL_LOG_NAME};
use selfswap_uptool::{ReplaceTool, SystemClock, SystemServiceControl, EXIT_FATAL};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "uptool")]
#[command(version, about = "Swaps a stopped executable for its staged update", long_about = None)]
struct Cli {
    /// Staging directory holding the handoff record and update archive.
    /// Defaults to the directory this binary lives in.
    #[arg(long)]
    update_dir: Option<PathBuf>,
    #[arg(long)]
    unlock_timeout_ms: Option<u64>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("uptool: {err:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let update_dir = match cli.update_dir {
        Some(dir) => dir,
        None => own_dir()?,
    };
    let (mut tool, _log_guard) = open_update(&update_dir)?;

    if let Some(ms) = cli.poll_interval_ms {
        tool.set_poll_interval(Duration::from_millis(ms));
    }
    let unlock_timeout = cli
        .unlock_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| tool.unlock_timeout());

    Ok(tool.run(unlock_timeout))
}

/// The handoff is read before anything is written, so an uptool pointed at
/// a directory without an update leaves no log or directory behind.
fn open_update(update_dir: &Path) -> Result<(ReplaceTool, WorkerGuard)> {
    let tool = ReplaceTool::open(
        update_dir,
        SystemClock,
        DetachedLauncher,
        SystemServiceControl,
    )
    .with_context(|| format!("no update to apply in {}", update_dir.display()))?;
    let guard = init_logging(update_dir);
    Ok((tool, guard))
}

fn own_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to resolve uptool executable path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("uptool executable has no parent directory")
}

fn init_logging(update_dir: &Path) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(update_dir, UPTOOL_LOG_NAME);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn open_update_without_handoff_writes_nothing() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "selfswap-uptool-main-{}-{}",
            std::process::id(),
            nanos
        ));

        assert!(open_update(&dir).is_err());
        assert!(!dir.exists());

        std::fs::create_dir_all(&dir).expect("must create update dir");
        assert!(open_update(&dir).is_err());
        assert!(!dir.join(UPTOOL_LOG_NAME).exists());
        assert_eq!(std::fs::read_dir(&dir).expect("must list").count(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
