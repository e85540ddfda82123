use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn pagesync_bin() -> String {
    env!("CARGO_BIN_EXE_pagesync").to_string()
}

fn baseline(dir: &Path, args: &[&str]) -> Output {
    Command::new(pagesync_bin())
        .arg("baseline")
        .args(args)
        .arg("--baseline-dir")
        .arg(dir)
        .output()
        .unwrap()
}

#[test]
fn test_baseline_init_update_get() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("baseline");

    assert!(baseline(&dir, &["init"]).status.success());
    assert!(dir.join(".git").exists());

    let input = temp.path().join("page.txt");
    fs::write(&input, "stored body\n").unwrap();
    let update = baseline(&dir, &["update", "42", "--file", input.to_str().unwrap()]);
    assert!(update.status.success(), "{}", String::from_utf8_lossy(&update.stderr));

    let get = baseline(&dir, &["get", "42"]);
    assert!(get.status.success());
    assert_eq!(String::from_utf8_lossy(&get.stdout), "stored body\n");
    assert!(!dir.join(".baseline.lock").exists());
}

#[test]
fn test_baseline_get_missing_fails() {
    let temp = TempDir::new().unwrap();
    let output = baseline(temp.path(), &["get", "7"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_id_rejected_before_touching_disk() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("baseline");

    let output = baseline(&dir, &["get", "123; rm -rf /"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid document id"));
    assert!(!dir.exists());
}

#[test]
fn test_baseline_merge_reports_conflicts() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("baseline");
    let base = temp.path().join("base.txt");
    let local = temp.path().join("local.txt");
    let remote = temp.path().join("remote.txt");

    fs::write(&base, "A\nB\nC\n").unwrap();
    assert!(baseline(&dir, &["update", "9", "--file", base.to_str().unwrap()]).status.success());

    fs::write(&local, "A2\nB\nC\n").unwrap();
    fs::write(&remote, "A\nB\nC2\n").unwrap();
    let clean = baseline(
        &dir,
        &["merge", "9", "--local", local.to_str().unwrap(), "--remote", remote.to_str().unwrap()],
    );
    assert!(clean.status.success());
    assert_eq!(String::from_utf8_lossy(&clean.stdout), "A2\nB\nC2\n");

    fs::write(&remote, "A3\nB\nC\n").unwrap();
    let conflicted = baseline(
        &dir,
        &["merge", "9", "--local", local.to_str().unwrap(), "--remote", remote.to_str().unwrap()],
    );
    assert_eq!(conflicted.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&conflicted.stdout).contains("<<<<<<< local"));
}

#[test]
fn test_sync_against_snapshot() {
    let temp = TempDir::new().unwrap();
    let snapshot = temp.path().join("remote.json");
    fs::write(
        &snapshot,
        r#"{
  "next_id": 300,
  "pages": {
    "100": {"title": "Home", "parent_id": null, "content": "", "space_key": "DOC",
            "last_modified": "2024-01-01T00:00:00Z", "position": 0},
    "200": {"title": "Intro", "parent_id": "100", "content": "hello", "space_key": "DOC",
            "last_modified": "2024-01-01T00:00:00Z", "position": 1}
  }
}"#,
    )
    .unwrap();
    fs::write(
        temp.path().join("pagesync.toml"),
        "remote_snapshot = \"remote.json\"\n\n[[tree]]\nanchor_id = \"100\"\nspace_key = \"DOC\"\nlocal_root = \"docs\"\n",
    )
    .unwrap();

    let output = Command::new(pagesync_bin())
        .args(["-c", temp.path().join("pagesync.toml").to_str().unwrap(), "sync", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""type":"pass""#));
    assert!(stdout.contains(r#""pulled":1"#));
    assert!(stdout.contains(r#""clean":true"#));

    let page = fs::read_to_string(temp.path().join("docs/Intro.md")).unwrap();
    assert!(page.ends_with("---\nhello"));
    assert!(temp.path().join(".pagesync/state.json").exists());
    assert!(temp.path().join(".pagesync/baseline/200.txt").exists());
}

#[test]
fn test_sync_rejects_invalid_config() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("pagesync.toml");
    fs::write(
        &config,
        "[[tree]]\nanchor_id = \"100\"\nspace_key = \"DOC\"\nlocal_root = \"docs\"\nforce_pull = true\nforce_push = true\n",
    )
    .unwrap();

    let output = Command::new(pagesync_bin())
        .args(["-c", config.to_str().unwrap(), "sync"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("mutually exclusive"));
}
