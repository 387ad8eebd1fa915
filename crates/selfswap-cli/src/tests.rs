use super::*;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use clap::error::ErrorKind;
use selfswap_core::state;

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_layout() -> IssuerLayout {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_LAYOUT_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "selfswap-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&dir).expect("must create test dir");
    IssuerLayout::new(dir.join("app"))
}

fn sample_record(layout: &IssuerLayout) -> UpdateRecord {
    UpdateRecord {
        update_dir: layout.updates_cache_dir().join("app-2.0-1-1"),
        update_version: "2.0".to_string(),
        issuer_version: "1.0".to_string(),
        start_after_update: true,
        update_attempt: 1,
    }
}

#[test]
fn cli_parses_stage_with_global_flags() {
    let cli = Cli::try_parse_from([
        "selfswap",
        "stage",
        "2.1.0",
        "update.zip",
        "--no-start",
        "--exe",
        "/opt/app/app",
        "--json",
    ])
    .expect("stage must parse");

    assert_eq!(cli.exe, Some(PathBuf::from("/opt/app/app")));
    assert!(cli.json);
    match cli.command {
        Commands::Stage {
            version,
            archive,
            no_start,
        } => {
            assert_eq!(version, "2.1.0");
            assert_eq!(archive, PathBuf::from("update.zip"));
            assert!(no_start);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_rejects_issuer_version_override() {
    assert!(Cli::try_parse_from(["selfswap", "--issuer-version", "9.9", "status"]).is_err());
    assert!(Cli::try_parse_from(["selfswap", "status", "--issuer-version=9.9"]).is_err());
}

#[test]
fn issuer_version_is_the_compiled_in_one() {
    let layout = test_layout();
    fs::write(layout.settings_path(), "version = \"9.9\"\n").expect("must write settings");

    let config = CoordinatorConfig::load(&layout, ISSUER_VERSION);
    assert_eq!(config.version, Version::new(env!("CARGO_PKG_VERSION")));

    let _ = fs::remove_dir_all(layout.issuer_dir());
}

#[test]
fn cli_requires_a_subcommand() {
    assert!(Cli::try_parse_from(["selfswap"]).is_err());
    assert!(Cli::try_parse_from(["selfswap", "--json"]).is_err());
}

#[test]
fn cli_rejects_compare_with_one_operand() {
    let err = Cli::try_parse_from(["selfswap", "compare", "1.0"]).expect_err("needs two");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn resolve_layout_makes_relative_exe_absolute() {
    let layout = resolve_layout(Some(Path::new("bin/app"))).expect("must resolve");
    assert!(layout.issuer_exe().is_absolute());
    assert!(layout.issuer_exe().ends_with("bin/app"));

    let layout = resolve_layout(Some(Path::new("/opt/app/app"))).expect("must resolve");
    assert_eq!(layout.issuer_exe(), Path::new("/opt/app/app"));
}

#[test]
fn format_comparison_uses_ordering_symbols() {
    let left = Version::new("1.2");
    let right = Version::new("1.10");
    let ordering = left.compare(&right).expect("valid versions");
    assert_eq!(format_comparison(&left, &right, ordering), "1.2 < 1.10");
    assert_eq!(ordering_name(ordering), "less");

    let padded = Version::new("1.2.0");
    let ordering = padded.compare(&left).expect("valid versions");
    assert_eq!(format_comparison(&padded, &left, ordering), "1.2.0 = 1.2");
    assert_eq!(ordering_name(ordering), "equal");
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "pending update discarded"),
        "pending update discarded"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "staged 2.0"),
        "[OK] staged 2.0"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "no pending update"),
        "[WARN] no pending update"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "handing off"),
        "[..] handing off"
    );
}

#[test]
fn status_lines_without_pending_update() {
    let layout = test_layout();
    let coordinator = UpdateCoordinator::new(layout.clone(), CoordinatorConfig::new("1.0"));

    let lines = format_status_lines(&coordinator, None, OutputStyle::Rich);
    assert_eq!(
        lines,
        vec![
            format!("[..] issuer: {} 1.0", layout.issuer_exe().display()),
            "[OK] no pending update".to_string(),
        ]
    );

    let _ = fs::remove_dir_all(layout.issuer_dir());
}

#[test]
fn status_lines_report_pending_update_and_broken_archive() {
    let layout = test_layout();
    let coordinator = UpdateCoordinator::new(layout.clone(), CoordinatorConfig::new("1.0"));
    let record = sample_record(&layout);

    let lines = format_status_lines(&coordinator, Some(&record), OutputStyle::Plain);
    assert_eq!(lines[1], "pending update: 2.0 (attempt 1/3)");
    assert_eq!(
        lines[2],
        format!("staging dir: {}", record.update_dir.display())
    );
    assert_eq!(lines[3], "start after update: true");
    assert!(lines[4].starts_with("archive unreadable: "), "{}", lines[4]);

    let _ = fs::remove_dir_all(layout.issuer_dir());
}

#[test]
fn status_json_reports_pending_record() {
    let layout = test_layout();
    let record = sample_record(&layout);
    state::save(&record, &layout.update_record_path()).expect("must save record");
    let coordinator = UpdateCoordinator::new(layout.clone(), CoordinatorConfig::new("1.0"));

    let pending = coordinator.pending_update().expect("must read record");
    let value = status_json(&coordinator, pending.as_ref());
    assert_eq!(value["issuer_version"], "1.0");
    assert_eq!(value["max_update_attempts"], 3);
    assert_eq!(value["pending"]["update_version"], "2.0");
    assert_eq!(value["pending"]["update_attempt"], 1);
    assert_eq!(value["pending"]["start_after_update"], true);

    let empty = status_json(&coordinator, None);
    assert!(empty["pending"].is_null());

    let _ = fs::remove_dir_all(layout.issuer_dir());
}

#[test]
fn open_log_file_waits_for_updates_cache() {
    let layout = test_layout();
    assert!(open_log_file(&layout).is_none());

    layout.ensure_base_dirs().expect("must create cache");
    assert!(open_log_file(&layout).is_some());
    assert!(layout.log_path().exists());

    let _ = fs::remove_dir_all(layout.issuer_dir());
}

#[test]
fn failed_stage_leaves_nothing_pending() {
    let layout = test_layout();
    let coordinator = UpdateCoordinator::new(layout.clone(), CoordinatorConfig::new("1.0"));
    let command = Commands::Stage {
        version: "2.0".to_string(),
        archive: layout.issuer_dir().join("missing.zip"),
        no_start: false,
    };

    let renderer = TerminalRenderer::from_style(OutputStyle::Plain);
    let result = run_command(command, true, &coordinator, renderer, OutputStyle::Plain);
    assert!(result.is_err());
    assert_eq!(coordinator.pending_update().expect("must read"), None);
    assert!(layout.staging_dirs().expect("must list").is_empty());
    assert_eq!(
        coordinator.apply_on_exit(),
        CheckOutcome::Continue(selfswap_issuer::ContinueReason::NoPendingUpdate)
    );

    let _ = fs::remove_dir_all(layout.issuer_dir());
}
