use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const BASE_TIME: i64 = 1_600_000_000;

/// Helper struct to manage snapshot directories and output files
struct TestFixture {
    temp_dir: TempDir,
    config_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        TestFixture {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            config_dir: TempDir::new().expect("Failed to create config directory"),
        }
    }

    /// Create a file with content and a fixed modification time
    fn create_file<P: AsRef<Path>>(&self, dir: &str, path: P, content: &str) -> PathBuf {
        let file_path = self.temp_dir.path().join(dir).join(path.as_ref());
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        set_file_mtime(&file_path, FileTime::from_unix_time(BASE_TIME, 0))
            .expect("Failed to set mtime");
        file_path
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn snapshot_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("snapshots").join(format!("{}.json", name))
    }

    /// Run the CLI with configuration isolated from the user's environment
    fn run(&self, args: &[&str]) -> Output {
        let exe = env!("CARGO_BIN_EXE_fssnap_cli");
        Command::new(exe)
            .args(args)
            .env("XDG_CONFIG_HOME", self.config_dir.path())
            .env("APPDATA", self.config_dir.path())
            .env("HOME", self.config_dir.path())
            .env("RUST_LOG", "warn")
            .output()
            .expect("Failed to execute command")
    }

    fn run_success(&self, args: &[&str]) -> Output {
        let output = self.run(args);
        if !output.status.success() {
            eprintln!("STDOUT:\n{}", String::from_utf8_lossy(&output.stdout));
            eprintln!("STDERR:\n{}", String::from_utf8_lossy(&output.stderr));
            panic!("Command failed with status: {}", output.status);
        }
        output
    }

    /// Capture `dir` under alias F1 into a snapshot file named after the snapshot
    fn capture(&self, name: &str, dir: &str, extra: &[&str]) -> PathBuf {
        let output_file = self.snapshot_file(name);
        let dir_arg = format!("F1={}", self.dir(dir).display());
        let output_arg = output_file.display().to_string();
        let mut args = vec![
            "capture",
            "--name",
            name,
            "--dir",
            dir_arg.as_str(),
            "--no-permissions",
            "--output",
            output_arg.as_str(),
        ];
        args.extend_from_slice(extra);
        self.run_success(&args);
        output_file
    }
}

fn populate(fixture: &TestFixture, dir: &str, file1: &str) {
    fixture.create_file(dir, "file1.dat", file1);
    fixture.create_file(dir, "file2.bin", "binary payload");
    fixture.create_file(dir, "sub-dir1/nested.txt", "nested");
}

#[test]
fn test_capture_writes_snapshot_file() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");

    let file = fixture.capture("snap1", "dir1", &[]);
    assert!(file.exists());

    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
    assert_eq!(document["format"], "fssnap");
    assert_eq!(document["version"], 1);
    assert_eq!(document["snapshot"]["name"], "snap1");
    assert_eq!(document["snapshot"]["directories"][0]["alias"], "F1");
}

#[test]
fn test_compare_identical_snapshots_exits_zero() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");
    populate(&fixture, "dir2", "same");

    let first = fixture.capture("snap1", "dir1", &[]);
    let second = fixture.capture("snap2", "dir2", &[]);

    let output = fixture.run(&[
        "compare",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Snapshots [snap1] and [snap2] are equal"));
}

#[test]
fn test_compare_reports_differences() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");
    populate(&fixture, "dir2", "changed");
    fixture.create_file("dir2", "extra.txt", "extra");

    let first = fixture.capture("snap1", "dir1", &[]);
    let second = fixture.capture("snap2", "dir2", &[]);

    let output = fixture.run(&[
        "compare",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Comparing [snap1] and [snap2] produced the following unexpected differences:"));
    assert!(stdout.contains("File is present in [snap2] snapshot only:"));
    assert!(stdout.contains("extra.txt"));
    assert!(stdout.contains("Different files:"));
    assert!(stdout.contains("file1.dat"));
}

#[test]
fn test_compare_json_output() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");
    populate(&fixture, "dir2", "changed");

    let first = fixture.capture("snap1", "dir1", &[]);
    let second = fixture.capture("snap2", "dir2", &[]);

    let output = fixture.run(&[
        "compare",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(2));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["first_snapshot"], "snap1");
    assert_eq!(report["second_snapshot"], "snap2");
    let differences = report["differences"].as_array().unwrap();
    assert_eq!(differences.len(), 1);
    assert_eq!(differences[0]["relative_path"], "file1.dat");
    assert!(differences[0]["first_differences"]["MD5 checksum"].is_string());
    assert!(differences[0]["first_differences"]["Size"].is_string());
}

#[test]
fn test_skip_file_rule_hides_difference() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");
    populate(&fixture, "dir2", "changed");

    let first = fixture.capture("snap1", "dir1", &["--skip-file", "F1:file1.dat"]);
    let second = fixture.capture("snap2", "dir2", &[]);

    let output = fixture.run(&[
        "compare",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_skip_file_attributes_and_skip_dir() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "aaaa");
    populate(&fixture, "dir2", "bbbb");
    fixture.create_file("dir2", "sub-dir1/only-here.txt", "new");

    // Same length, different bytes: skipping md5 leaves nothing to report
    let first = fixture.capture(
        "snap1",
        "dir1",
        &["--skip-file", "F1:file1.dat:md5", "--skip-dir", "F1:sub-dir1"],
    );
    let second = fixture.capture("snap2", "dir2", &[]);

    let output = fixture.run(&[
        "compare",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "unexpected report:\n{}", stdout);
}

#[test]
fn test_compare_with_renamed_snapshots() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");

    let first = fixture.capture("snap1", "dir1", &[]);
    let copy = fixture.snapshot_file("copy");
    fs::copy(&first, &copy).unwrap();

    // Same stored name on both sides is rejected
    let output = fixture.run(&["compare", first.to_str().unwrap(), copy.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));

    let output = fixture.run(&[
        "compare",
        first.to_str().unwrap(),
        copy.to_str().unwrap(),
        "--second-name",
        "later",
    ]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[snap1] and [later]"));
}

#[test]
fn test_show_describes_snapshot() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");

    let file = fixture.capture("snap1", "dir1", &["--skip-dir", "F1:sub-dir1"]);

    let output = fixture.run_success(&["show", file.to_str().unwrap()]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Snapshot 'snap1' loaded, originally captured at"));
    assert!(stdout.contains("[F1]"));
    assert!(stdout.contains("skip directory 'sub-dir1'"));
}

#[test]
fn test_capture_rejects_bad_input() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");
    let output_file = fixture.snapshot_file("bad");
    let output_arg = output_file.display().to_string();

    let missing = format!("F1={}", fixture.dir("missing").display());
    let output = fixture.run(&["capture", "--name", "bad", "--dir", &missing, "-o", &output_arg]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!output_file.exists());

    let dir_arg = format!("F1={}", fixture.dir("dir1").display());
    let output = fixture.run(&[
        "capture",
        "--name",
        "bad",
        "--dir",
        &dir_arg,
        "--skip-file",
        "F9:file1.dat",
        "-o",
        &output_arg,
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("F9"));

    let output = fixture.run(&["capture", "--name", "bad", "--dir", "no-alias", "-o", &output_arg]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_compare_rejects_corrupt_file() {
    let fixture = TestFixture::new();
    populate(&fixture, "dir1", "same");
    let first = fixture.capture("snap1", "dir1", &[]);
    let corrupt = fixture.temp_dir.path().join("corrupt.json");
    fs::write(&corrupt, "{ not a snapshot").unwrap();

    let output = fixture.run(&["compare", first.to_str().unwrap(), corrupt.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Bad snapshot file"));
}

#[test]
fn test_config_init_writes_defaults() {
    let fixture = TestFixture::new();

    let output = fixture.run_success(&["config"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("defaults, not written"));

    let output = fixture.run_success(&["config", "--init"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(created)"));
    assert!(stdout.contains("check_md5 = true"));

    let output = fixture.run_success(&["config"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(existing)"));
}

#[test]
fn test_show_missing_file_fails() {
    let fixture = TestFixture::new();
    let missing = fixture.temp_dir.path().join("absent.json");

    assert_cmd::Command::cargo_bin("fssnap_cli")
        .unwrap()
        .env("XDG_CONFIG_HOME", fixture.config_dir.path())
        .env("HOME", fixture.config_dir.path())
        .arg("show")
        .arg(&missing)
        .assert()
        .code(1);
}

#[test]
fn test_capture_requires_a_directory() {
    assert_cmd::Command::cargo_bin("fssnap_cli")
        .unwrap()
        .args(["capture", "--name", "snap1", "--output", "snap1.json"])
        .assert()
        .failure();
}
