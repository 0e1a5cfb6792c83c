use std::path::{Path, PathBuf};

use assert_cmd::Command;
use fs_err as fs;
use predicates::prelude::*;
use tempfile::TempDir;

/// A home directory and a project directory `proj` inside one temp dir.
struct Env {
    _tmp: TempDir,
    home: PathBuf,
    project: PathBuf,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().join("home");
        let project = tmp.path().join("proj");
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(project.join("data/nested")).unwrap();
        fs::write(project.join("data/a.txt"), "alpha").unwrap();
        fs::write(project.join("data/nested/b.csv"), "1,2,3").unwrap();
        Self {
            _tmp: tmp,
            home,
            project,
        }
    }

    fn dtm(&self) -> Command {
        let mut cmd = Command::cargo_bin("dtm").unwrap();
        cmd.env("HOME", &self.home)
            .env_remove("RUST_LOG")
            .current_dir(&self.project);
        cmd
    }

    fn configured(self) -> Self {
        self.dtm().arg("config").assert().success();
        self
    }

    fn initialized(self) -> Self {
        let env = self.configured();
        env.dtm()
            .args(["init", "--data-dir", "data"])
            .assert()
            .success();
        env
    }

    fn add_version(&self, args: &[&str]) -> String {
        let output = self
            .dtm()
            .args(["--json", "add-version"])
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success(), "{output:?}");
        let entry: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        entry["hash"].as_str().unwrap().to_string()
    }

    fn storage(&self) -> PathBuf {
        self.home.join(".datamole/storage")
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn config_seeds_default_settings() {
    let env = Env::new();
    env.dtm()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("storage_path"));

    let settings = read(&env.home.join(".datamole/config.yaml"));
    assert!(settings.contains(".datamole/storage"));
}

#[test]
fn config_sets_backend_keys() {
    let env = Env::new();
    env.dtm()
        .args([
            "config",
            "--backend",
            "gcs",
            "--set",
            "default_bucket=my-bucket",
            "--set",
            "service_account_json=/creds.json",
        ])
        .assert()
        .success();

    let settings: serde_json::Value = serde_json::from_slice(
        &env.dtm()
            .args(["--json", "config"])
            .output()
            .unwrap()
            .stdout,
    )
    .unwrap();
    assert_eq!(
        settings["settings"]["backends"]["gcs"]["default_bucket"],
        "my-bucket"
    );
    assert!(settings["settings"]["backends"]["local"]["storage_path"].is_string());
}

#[test]
fn config_rejects_malformed_set() {
    Env::new()
        .dtm()
        .args(["config", "--set", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn init_without_settings_explains_setup() {
    let env = Env::new();
    env.dtm()
        .arg("init")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("dtm config"));
    assert!(!env.project.join(".datamole").exists());
}

#[test]
fn init_creates_manifest() {
    let env = Env::new().configured();
    env.dtm()
        .args(["init", "--data-dir", "data"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized datamole project 'proj'"));

    let manifest = read(&env.project.join(".datamole"));
    assert!(manifest.contains("project: proj"));
    assert!(manifest.contains("data_directory: data"));
    assert!(manifest.contains("backend_type: local"));
    assert!(env.storage().join("proj").is_dir());
}

#[test]
fn init_with_stubbed_backend_fails_fast() {
    let env = Env::new().configured();
    env.dtm()
        .args(["config", "--backend", "azure", "--set", "account=acct"])
        .assert()
        .success();
    env.dtm()
        .args(["init", "--backend", "azure"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not implemented"));
    assert!(!env.project.join(".datamole").exists());
}

#[test]
fn unknown_backend_name_is_rejected() {
    let env = Env::new().configured();
    env.dtm()
        .args(["init", "--backend", "ftp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported backend type: ftp"));
}

#[test]
fn add_list_and_current_version() {
    let env = Env::new().initialized();
    env.dtm()
        .args(["list-versions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No versions yet"));

    let hash = env.add_version(&["-m", "first cut", "-t", "v1"]);
    assert_eq!(hash.len(), 8);

    env.dtm()
        .arg("list-versions")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("* {hash}")))
        .stdout(predicate::str::contains("[v1]"))
        .stdout(predicate::str::contains("first cut"));
    env.dtm()
        .arg("current-version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(hash.as_str()));
    assert!(env.storage().join("proj").join(&hash).join("a.txt").is_file());
}

#[test]
fn duplicate_tag_is_rejected() {
    let env = Env::new().initialized();
    env.add_version(&["-t", "v1"]);
    env.dtm()
        .args(["add-version", "-t", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Tag 'v1' already exists"));
}

#[test]
fn pull_restores_data_by_tag() {
    let env = Env::new().initialized();
    env.add_version(&["-t", "v1"]);
    fs::write(env.project.join("data/a.txt"), "changed").unwrap();
    env.add_version(&[]);

    env.dtm()
        .args(["pull", "v1", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pulled version"));
    assert_eq!(read(&env.project.join("data/a.txt")), "alpha");
}

#[test]
fn pull_declined_on_stdin_leaves_data_alone() {
    let env = Env::new().initialized();
    let first = env.add_version(&[]);
    fs::write(env.project.join("data/a.txt"), "changed").unwrap();

    env.dtm()
        .args(["pull-version", &first])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pull cancelled"));
    assert_eq!(read(&env.project.join("data/a.txt")), "changed");
}

#[test]
fn pull_to_another_directory() {
    let env = Env::new().initialized();
    let hash = env.add_version(&[]);
    let prefix = &hash[..4];

    env.dtm()
        .args(["pull-version", prefix, "--to", "../checkout"])
        .assert()
        .success();
    let checkout = env.project.parent().unwrap().join("checkout");
    assert_eq!(read(&checkout.join("nested/b.csv")), "1,2,3");
}

#[test]
fn unknown_version_reports_json_error() {
    let env = Env::new().initialized();
    env.add_version(&[]);
    let output = env
        .dtm()
        .args(["--json", "pull-version", "nosuchtag"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let error: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(error["error"], "not_found");
}

#[test]
fn delete_version_with_purge() {
    let env = Env::new().initialized();
    let first = env.add_version(&[]);
    let second = env.add_version(&[]);

    env.dtm()
        .args(["delete-version", &second])
        .assert()
        .failure()
        .stderr(predicate::str::contains("current version"));

    env.dtm()
        .args(["delete-version", &first, "--purge"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Deleted version {first}")));
    assert!(!env.storage().join("proj").join(&first).exists());
    assert!(!read(&env.project.join(".datamole")).contains(&first));
}

#[test]
fn reinit_restores_missing_data() {
    let env = Env::new().initialized();
    env.add_version(&[]);
    fs::remove_dir_all(env.project.join("data")).unwrap();

    env.dtm()
        .args(["init", "--backend", "gcs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized (local backend)"))
        .stdout(predicate::str::contains("Pulled current version"));
    assert_eq!(read(&env.project.join("data/a.txt")), "alpha");
}

#[test]
fn commands_outside_a_project_fail() {
    let env = Env::new().configured();
    env.dtm()
        .arg("list-versions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("dtm init"));
}

#[test]
fn pull_into_the_project_root_is_refused() {
    let env = Env::new().initialized();
    env.add_version(&[]);

    env.dtm()
        .args(["pull", "--to", ".", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("contains the project"));
    assert!(env.project.join(".datamole").is_file());
    assert!(env.project.join("data/a.txt").is_file());
}

#[test]
fn init_rejects_data_dir_outside_project() {
    let env = Env::new().configured();
    env.dtm()
        .args(["init", "--data-dir", "../elsewhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be inside the project"));
    assert!(!env.project.join(".datamole").exists());
}
