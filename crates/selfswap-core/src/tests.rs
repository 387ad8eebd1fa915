use super::*;
use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "selfswap-core-tests-{label}-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("must create test dir");
    dir
}

fn write_zip(path: &Path, entries: &[(&str, &[u8], u32)]) {
    let file = fs::File::create(path).expect("must create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, bytes, mode) in entries {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
        writer.start_file(*name, options).expect("must start entry");
        writer.write_all(bytes).expect("must write entry");
    }
    writer.finish().expect("must finish zip");
}

fn sample_update_record() -> UpdateRecord {
    UpdateRecord {
        update_dir: PathBuf::from("/opt/app/selfupdate/app-2.0-41-99"),
        update_version: "2.0".to_string(),
        issuer_version: "1.0".to_string(),
        start_after_update: true,
        update_attempt: 2,
    }
}

fn sample_handoff_record() -> HandoffRecord {
    HandoffRecord {
        target_dir: PathBuf::from("/opt/app"),
        issuer_exe: PathBuf::from("/opt/app/app"),
        start_after_update: true,
        update_record_path: PathBuf::from("/opt/app/app.selfupdate"),
        issuer_entry: "app".to_string(),
        service_name: Some("app-daemon".to_string()),
        unlock_timeout_ms: 30_000,
        poll_interval_ms: 500,
    }
}

#[test]
fn version_validity() {
    assert!(Version::from("0").valid());
    assert!(Version::from("1").valid());
    assert!(Version::from("1.2.3").valid());
    assert!(Version::from(" 1.0.1 ").valid());

    assert!(!Version::from("").valid());
    assert!(!Version::from("   ").valid());
    assert!(!Version::from(".").valid());
    assert!(!Version::from("1.-1").valid());
    assert!(!Version::from("a.b").valid());
    assert!(!Version::from("1.2b").valid());
    assert!(!Version::from("+1").valid());
}

#[test]
fn version_parse_skips_empty_segments() {
    assert_eq!(Version::from("1..2").parse().expect("must parse"), vec![1, 2]);
    assert_eq!(Version::from("3.").parse().expect("must parse"), vec![3]);
}

#[test]
fn version_trailing_zeros_are_equal() {
    let a = Version::from("1.0.1");
    let b = Version::from("1.0.1.0");
    let c = Version::from("1.0.1.0.0");
    assert!(a.is_equal(&b).expect("must compare"));
    assert!(b.is_equal(&c).expect("must compare"));
    assert!(a.is_equal(&c).expect("must compare"));
    assert!(!Version::from("1.0.1.0")
        .is_equal(&Version::from("1.0.1.1"))
        .expect("must compare"));
}

#[test]
fn version_ordering_is_component_wise() {
    let cases = [
        ("1.10", "1.9", Ordering::Greater),
        ("2", "1.99.99", Ordering::Greater),
        ("0.2", "0.3", Ordering::Less),
        ("1.0.0.1", "1", Ordering::Greater),
        ("010", "10", Ordering::Equal),
    ];
    for (left, right, expected) in cases {
        let actual = Version::from(left)
            .compare(&Version::from(right))
            .expect("must compare");
        assert_eq!(actual, expected, "{left} vs {right}");
    }
}

#[test]
fn version_compare_is_a_total_preorder() {
    let versions: Vec<Version> = ["0", "0.1", "1", "1.0", "1.0.1", "1.2", "2.0.0.1", "10"]
        .into_iter()
        .map(Version::from)
        .collect();

    for a in &versions {
        assert_eq!(a.compare(a).expect("must compare"), Ordering::Equal);
        for b in &versions {
            let ab = a.compare(b).expect("must compare");
            let ba = b.compare(a).expect("must compare");
            assert_eq!(ab, ba.reverse(), "antisymmetry for {a} / {b}");
            for c in &versions {
                let bc = b.compare(c).expect("must compare");
                if ab != Ordering::Greater && bc != Ordering::Greater {
                    assert_ne!(
                        a.compare(c).expect("must compare"),
                        Ordering::Greater,
                        "transitivity for {a} <= {b} <= {c}"
                    );
                }
            }
        }
    }
}

#[test]
fn version_compare_propagates_invalid_operand() {
    let good = Version::from("1.0");
    let bad = Version::from("1.x");
    assert!(matches!(
        good.compare(&bad),
        Err(Error::InvalidVersion { .. })
    ));
    assert!(matches!(
        bad.is_greater(&good),
        Err(Error::InvalidVersion { .. })
    ));
    assert!("1.x".parse::<Version>().is_err());
    assert_eq!("1.2".parse::<Version>().expect("must parse").as_str(), "1.2");
}

#[test]
fn update_record_round_trip() {
    let dir = test_dir("update-record");
    let path = dir.join("app.selfupdate");
    let record = sample_update_record();

    state::save(&record, &path).expect("must save");
    let loaded: UpdateRecord = state::load(&path).expect("must load");
    assert_eq!(loaded, record);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn update_record_round_trip_keeps_zero_values() {
    let dir = test_dir("update-record-zero");
    let path = dir.join("app.selfupdate");
    let record = UpdateRecord {
        update_dir: PathBuf::new(),
        update_version: String::new(),
        issuer_version: String::new(),
        start_after_update: false,
        update_attempt: 0,
    };

    state::save(&record, &path).expect("must save");
    let loaded: UpdateRecord = state::load(&path).expect("must load");
    assert_eq!(loaded, record);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn handoff_record_round_trip_with_and_without_service() {
    let dir = test_dir("handoff-record");
    let path = handoff_path(&dir);

    let with_service = sample_handoff_record();
    state::save(&with_service, &path).expect("must save");
    let loaded: HandoffRecord = state::load(&path).expect("must load");
    assert_eq!(loaded, with_service);

    let without_service = HandoffRecord {
        service_name: None,
        issuer_entry: String::new(),
        unlock_timeout_ms: 0,
        poll_interval_ms: 0,
        ..sample_handoff_record()
    };
    state::save(&without_service, &path).expect("must overwrite");
    let loaded: HandoffRecord = state::load(&path).expect("must load");
    assert_eq!(loaded, without_service);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn save_leaves_no_temp_files_behind() {
    let dir = test_dir("no-temp");
    let path = dir.join("nested").join("app.selfupdate");

    state::save(&sample_update_record(), &path).expect("must save");
    let names: Vec<String> = fs::read_dir(path.parent().expect("parent"))
        .expect("must list")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["app.selfupdate".to_string()]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn load_missing_record_is_not_found() {
    let dir = test_dir("missing");
    let err = state::load::<UpdateRecord>(&dir.join("absent.selfupdate"))
        .expect_err("must fail");
    assert!(err.is_not_found());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn load_garbage_is_corrupt_state() {
    let dir = test_dir("garbage");
    let path = dir.join("app.selfupdate");
    fs::write(&path, b"\x00\x01 definitely not toml [[[").expect("must write");

    let err = state::load::<UpdateRecord>(&path).expect_err("must fail");
    assert!(matches!(err, Error::CorruptState { .. }), "{err}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn load_rejects_other_record_kind() {
    let dir = test_dir("wrong-kind");
    let path = dir.join("selfupdate");
    state::save(&sample_handoff_record(), &path).expect("must save");

    let err = state::load::<UpdateRecord>(&path).expect_err("must fail");
    assert!(matches!(err, Error::CorruptState { .. }), "{err}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn load_rejects_unknown_schema() {
    let dir = test_dir("schema");
    let path = dir.join("app.selfupdate");
    let raw = store::serialize_record(&sample_update_record())
        .expect("must serialize")
        .replace("schema = 1", "schema = 7");
    fs::write(&path, raw).expect("must write");

    let err = state::load::<UpdateRecord>(&path).expect_err("must fail");
    match err {
        Error::CorruptState { reason, .. } => assert!(reason.contains("schema 7"), "{reason}"),
        other => panic!("unexpected error: {other}"),
    }

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn remove_reports_whether_record_existed() {
    let dir = test_dir("remove");
    let path = dir.join("app.selfupdate");
    state::save(&sample_update_record(), &path).expect("must save");

    assert!(state::remove(&path).expect("must remove"));
    assert!(!state::remove(&path).expect("second remove is a no-op"));
    assert!(!path.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn extract_entry_writes_bytes_and_mode() {
    let dir = test_dir("extract");
    let archive = dir.join("update");
    write_zip(
        &archive,
        &[("uptool", b"helper-binary", 0o755), ("app", b"new-app", 0o700)],
    );

    let dest = dir.join("out").join("uptool");
    extract_entry(&archive, "uptool", &dest).expect("must extract");
    assert_eq!(fs::read(&dest).expect("must read"), b"helper-binary");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&dest).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    let mut names = entry_names(&archive).expect("must list");
    names.sort();
    assert_eq!(names, vec!["app".to_string(), "uptool".to_string()]);
    assert!(contains_entry(&archive, "app").expect("must inspect"));
    assert!(!contains_entry(&archive, "missing").expect("must inspect"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn extract_missing_entry_is_entry_not_found() {
    let dir = test_dir("extract-missing");
    let archive = dir.join("update");
    write_zip(&archive, &[("app", b"new-app", 0o755)]);

    let err = extract_entry(&archive, "uptool", &dir.join("uptool")).expect_err("must fail");
    assert!(
        matches!(&err, Error::EntryNotFound { entry, .. } if entry == "uptool"),
        "{err}"
    );
    assert!(!dir.join("uptool").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn extract_from_non_zip_is_io_error() {
    let dir = test_dir("extract-bad");
    let archive = dir.join("update");
    fs::write(&archive, b"not a zip").expect("must write");

    let err = extract_entry(&archive, "app", &dir.join("app")).expect_err("must fail");
    assert!(matches!(err, Error::Io { .. }), "{err}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn backup_path_appends_suffix_to_full_file_name() {
    let record = HandoffRecord {
        issuer_exe: PathBuf::from("/opt/app/app.exe"),
        ..sample_handoff_record()
    };
    assert_eq!(record.backup_path(), PathBuf::from("/opt/app/app.exe.bak"));
}

#[test]
fn exe_extension_helpers_follow_platform() {
    if cfg!(windows) {
        assert_eq!(ensure_exe_ext("uptool"), "uptool.exe");
        assert_eq!(ensure_exe_ext("uptool.exe"), "uptool.exe");
        assert_eq!(trim_exe_ext(Path::new("app.exe")), PathBuf::from("app"));
    } else {
        assert_eq!(ensure_exe_ext("uptool"), "uptool");
        assert_eq!(trim_exe_ext(Path::new("app.exe")), PathBuf::from("app.exe"));
    }
    assert_eq!(uptool_file_name(), ensure_exe_ext(UPTOOL_EXE_NAME));
}
