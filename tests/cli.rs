use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn snips_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("snips");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // A checkout as `snips download` would leave it.
    let repo = root.join("repos").join("alice").join("demo");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(
        repo.join("src").join("parser.py"),
        "def parse_config(path):\n    return toml.load(path)\n",
    )
    .unwrap();
    fs::write(
        repo.join("src").join("render.rs"),
        "fn render(frame: &Frame) {\n    canvas.draw(frame);\n}\n",
    )
    .unwrap();
    fs::write(repo.join("notes.bin"), "ignored").unwrap();

    let config_content = format!(
        r#"[storage]
repo_root = "{root}/repos"
manifest_path = "{root}/data/manifest.json"
db_path = "{root}/data/snips.sqlite"
backend = "sqlite"

[embedding]
provider = "hashing"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("snips.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_snips(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = snips_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run snips binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_langs_without_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, success) = run_snips(&tmp.path().join("missing.toml"), &["langs"]);
    assert!(success, "langs failed: {}", stderr);
    assert!(stdout.contains("Python"));
    assert!(stdout.contains("Rust"));
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_snips(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("snips.sqlite").exists());

    let (_, _, success) = run_snips(&config_path, &["init"]);
    assert!(success, "second init failed (not idempotent)");
}

#[test]
fn test_train_then_search() {
    let (tmp, config_path) = setup_test_env();
    run_snips(&config_path, &["init"]);

    let (stdout, stderr, success) = run_snips(&config_path, &["train", "alice", "demo"]);
    assert!(success, "train failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("trained alice/demo"));
    assert!(stdout.contains("rows: 2"));
    assert!(tmp.path().join("data").join("manifest.json").exists());

    let (stdout, stderr, success) = run_snips(
        &config_path,
        &["search", "alice", "demo", "parse config", "--limit", "1"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1. parser.py [Python]"));
    assert!(stdout.contains("https://github.com/alice/demo/blob/HEAD/src/parser.py"));
    assert!(!stdout.contains("2. "));
}

#[test]
fn test_train_twice_needs_flag() {
    let (_tmp, config_path) = setup_test_env();
    run_snips(&config_path, &["init"]);
    run_snips(&config_path, &["train", "alice", "demo"]);

    let (_, stderr, success) = run_snips(&config_path, &["train", "alice", "demo"]);
    assert!(!success);
    assert!(stderr.contains("already trained"));

    let (stdout, _, success) =
        run_snips(&config_path, &["train", "alice", "demo", "--pretrained-ok"]);
    assert!(success);
    assert!(stdout.contains("nothing to do"));

    let (stdout, _, success) = run_snips(&config_path, &["train", "alice", "demo", "--retrain"]);
    assert!(success);
    assert!(stdout.contains("rows: 2"));
}

#[test]
fn test_search_untrained_repo_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_snips(&config_path, &["init"]);
    let (_, stderr, success) = run_snips(&config_path, &["search", "bob", "nothing", "query"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_indexes_lists_trained_repo() {
    let (_tmp, config_path) = setup_test_env();
    run_snips(&config_path, &["init"]);

    let (stdout, _, success) = run_snips(&config_path, &["indexes"]);
    assert!(success);
    assert!(stdout.contains("No indexes."));

    run_snips(&config_path, &["train", "alice", "demo"]);
    let (stdout, _, success) = run_snips(&config_path, &["indexes"]);
    assert!(success);
    assert!(stdout.contains("alice/demo"));
    assert!(stdout.contains("trained=true rows=2"));
}
