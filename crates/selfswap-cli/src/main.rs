use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use selfswap_core::{entry_names, UpdateRecord, Version};
use selfswap_issuer::{
    CheckOutcome, CoordinatorConfig, IssuerLayout, UpdateCoordinator, EXIT_CODE_REPLACING,
};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod render;

use render::{current_output_style, render_status_line, OutputStyle, TerminalRenderer};

/// The issuer's own version is whatever was compiled in; an update is only
/// applied when it is newer than this.
const ISSUER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "selfswap")]
#[command(version, about = "Self-updating executable with crash-safe replacement", long_about = None)]
struct Cli {
    /// Act on this executable instead of the running one.
    #[arg(long, global = true)]
    exe: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the pending update, if any.
    Status,
    /// Stage an update archive; `-` reads it from stdin.
    Stage {
        version: String,
        archive: PathBuf,
        #[arg(long)]
        no_start: bool,
    },
    /// Drop the pending update and its staging directory.
    Discard,
    Compare {
        left: String,
        right: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let layout = resolve_layout(cli.exe.as_deref())?;
    init_tracing(&layout);

    let config = CoordinatorConfig::load(&layout, ISSUER_VERSION);
    let coordinator = UpdateCoordinator::new(layout, config);
    let output_style = current_output_style();
    let renderer = TerminalRenderer::from_style(output_style);

    // Must run before anything else on every start.
    match coordinator.check_update_ready() {
        CheckOutcome::MustExit {
            update_dir,
            attempt,
        } => {
            renderer.print_status(
                "step",
                &format!(
                    "update handed off to uptool (attempt {attempt}, {}); exiting",
                    update_dir.display()
                ),
            );
            std::process::exit(EXIT_CODE_REPLACING);
        }
        CheckOutcome::Continue(reason) => {
            tracing::debug!(reason = reason.as_str(), "continuing startup");
        }
    }

    let result = run_command(cli.command, cli.json, &coordinator, renderer, output_style);

    // An update staged by this run is applied as the process goes away.
    if let CheckOutcome::MustExit {
        update_dir,
        attempt,
    } = coordinator.apply_on_exit()
    {
        if !cli.json {
            renderer.print_status(
                "step",
                &format!(
                    "update handed off to uptool (attempt {attempt}, {}); applying on exit",
                    update_dir.display()
                ),
            );
        }
    }
    result
}

fn run_command(
    command: Commands,
    json: bool,
    coordinator: &UpdateCoordinator,
    renderer: TerminalRenderer,
    output_style: OutputStyle,
) -> Result<()> {
    match command {
        Commands::Status => {
            let pending = coordinator.pending_update()?;
            if json {
                let value = status_json(coordinator, pending.as_ref());
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                renderer.print_section("Update status");
                renderer.print_lines(&format_status_lines(
                    coordinator,
                    pending.as_ref(),
                    output_style,
                ));
            }
        }
        Commands::Stage {
            version,
            archive,
            no_start,
        } => {
            let version = Version::new(version);
            let mut sink = coordinator
                .begin_update(&version, !no_start)
                .with_context(|| format!("failed to prepare update {version}"))?;
            let streamed = if archive == Path::new("-") {
                io::copy(&mut io::stdin().lock(), &mut sink)
            } else {
                let mut file = File::open(&archive)
                    .with_context(|| format!("failed to open {}", archive.display()))?;
                io::copy(&mut file, &mut sink)
            };
            let copied = streamed.context("failed to stream update archive")?;
            let record = sink
                .finish()
                .with_context(|| format!("failed to stage update {version}"))?;

            if json {
                let value = json!({
                    "staged": record.update_version,
                    "update_dir": record.update_dir,
                    "bytes": copied,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                renderer.print_status(
                    "ok",
                    &format!(
                        "staged {} ({copied} bytes) in {}; applied on exit",
                        record.update_version,
                        record.update_dir.display()
                    ),
                );
            }
        }
        Commands::Discard => {
            let removed = coordinator.discard_pending_update()?;
            if json {
                println!("{}", json!({ "discarded": removed }));
            } else if removed {
                renderer.print_status("ok", "pending update discarded");
            } else {
                renderer.print_status("warn", "no pending update");
            }
        }
        Commands::Compare { left, right } => {
            let left = Version::new(left);
            let right = Version::new(right);
            let ordering = left.compare(&right)?;
            if json {
                let value = json!({
                    "left": left,
                    "right": right,
                    "ordering": ordering_name(ordering),
                });
                println!("{value}");
            } else {
                println!("{}", format_comparison(&left, &right, ordering));
            }
        }
    }
    Ok(())
}

fn resolve_layout(exe: Option<&Path>) -> Result<IssuerLayout> {
    match exe {
        Some(exe) if exe.is_absolute() => Ok(IssuerLayout::new(exe)),
        Some(exe) => {
            let cwd = std::env::current_dir().context("failed to resolve current directory")?;
            Ok(IssuerLayout::new(cwd.join(exe)))
        }
        None => IssuerLayout::current().context("failed to locate running executable"),
    }
}

/// Logs go to stderr, and also to the issuer log once an updates cache
/// exists beside the executable.
fn init_tracing(layout: &IssuerLayout) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_file = open_log_file(layout);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(log_file.map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
        }))
        .init();
}

fn open_log_file(layout: &IssuerLayout) -> Option<File> {
    if !layout.updates_cache_dir().is_dir() {
        return None;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.log_path())
        .ok()
}

fn status_json(
    coordinator: &UpdateCoordinator,
    pending: Option<&UpdateRecord>,
) -> serde_json::Value {
    let config = coordinator.config();
    json!({
        "issuer": coordinator.layout().issuer_exe(),
        "issuer_version": config.version,
        "max_update_attempts": config.max_update_attempts,
        "pending": pending.map(|record| json!({
            "update_version": record.update_version,
            "issuer_version": record.issuer_version,
            "update_dir": record.update_dir,
            "start_after_update": record.start_after_update,
            "update_attempt": record.update_attempt,
        })),
    })
}

fn format_status_lines(
    coordinator: &UpdateCoordinator,
    pending: Option<&UpdateRecord>,
    style: OutputStyle,
) -> Vec<String> {
    let config = coordinator.config();
    let mut lines = vec![render_status_line(
        style,
        "step",
        &format!(
            "issuer: {} {}",
            coordinator.layout().issuer_exe().display(),
            config.version
        ),
    )];

    let Some(record) = pending else {
        lines.push(render_status_line(style, "ok", "no pending update"));
        return lines;
    };

    lines.push(render_status_line(
        style,
        "warn",
        &format!(
            "pending update: {} (attempt {}/{})",
            record.update_version, record.update_attempt, config.max_update_attempts
        ),
    ));
    lines.push(format!("staging dir: {}", record.update_dir.display()));
    lines.push(format!("start after update: {}", record.start_after_update));
    match entry_names(&record.archive_path()) {
        Ok(names) => lines.push(format!("archive entries: {}", names.join(", "))),
        Err(err) => lines.push(render_status_line(
            style,
            "error",
            &format!("archive unreadable: {err}"),
        )),
    }
    lines
}

fn format_comparison(left: &Version, right: &Version, ordering: Ordering) -> String {
    let symbol = match ordering {
        Ordering::Less => "<",
        Ordering::Equal => "=",
        Ordering::Greater => ">",
    };
    format!("{left} {symbol} {right}")
}

fn ordering_name(ordering: Ordering) -> &'static str {
    match ordering {
        Ordering::Less => "less",
        Ordering::Equal => "equal",
        Ordering::Greater => "greater",
    }
}

#[cfg(test)]
mod tests;
