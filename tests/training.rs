use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use snippet_search::config::Config;
use snippet_search::hosting::HostingClient;
use snippet_search::registry::load_manifest;
use snippet_search::service::Services;
use snippet_search_core::error::EngineError;
use snippet_search_core::models::RepoKey;
use snippet_search_core::search::SearchRequest;

struct NoHosting;

#[async_trait]
impl HostingClient for NoHosting {
    async fn list_repositories(&self, _user: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn download(&self, _user: &str, _repo: &str, _dest: &Path) -> Result<()> {
        anyhow::bail!("offline")
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Lay out `alice/demo` with three supported and two unsupported files.
fn checkout(config: &Config) {
    let repo = config.storage.repo_path("alice", "demo");
    write(
        &repo,
        "src/parser.py",
        "def parse_config(path):\n    with open(path) as f:\n        return toml.load(f)\n\n\ndef main():\n    parse_config('x')\n",
    );
    write(
        &repo,
        "src/render.rs",
        "fn render(frame: &Frame) {\n    canvas.draw(frame);\n}\n",
    );
    write(&repo, "README.md", "# Demo\n\nParse config files quickly.\n");
    write(&repo, "logo.png", "not really a png");
    write(&repo, "LICENSE", "MIT");
}

async fn services(tmp: &TempDir, backend: &str) -> Services {
    let mut config = Config::rooted_at(tmp.path());
    config.storage.backend = backend.to_string();
    checkout(&config);
    Services::with_hosting(config, Arc::new(NoHosting)).await.unwrap()
}

fn request(query: &str, limit: Option<i64>) -> SearchRequest<'_> {
    SearchRequest {
        query,
        language: None,
        limit,
    }
}

#[tokio::test]
async fn test_train_indexes_supported_files_only() {
    let tmp = TempDir::new().unwrap();
    let services = services(&tmp, "sqlite").await;
    let key = RepoKey::new("alice", "demo");

    assert!(services.coordinator.train(&key, false, false).await.unwrap());

    let engine = services.registry.get(&key).await.unwrap();
    assert_eq!(engine.table().row_count().await.unwrap(), 3);
    assert!(services.is_trained("alice/demo").await.unwrap());
    assert_eq!(
        load_manifest(&services.config.storage.manifest_path).unwrap(),
        vec![key]
    );
}

#[tokio::test]
async fn test_pretrained_ok_and_already_trained() {
    let tmp = TempDir::new().unwrap();
    let services = services(&tmp, "memory").await;
    let key = RepoKey::new("alice", "demo");
    services.coordinator.train(&key, false, false).await.unwrap();

    let repo = services.repo_path(&key);
    write(&repo, "src/extra.go", "package main\n");

    assert!(!services.coordinator.train(&key, false, true).await.unwrap());
    let err = services
        .coordinator
        .train(&key, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyTrained(_)));

    let engine = services.registry.get(&key).await.unwrap();
    assert_eq!(engine.table().row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_retrain_reflects_only_latest_checkout() {
    let tmp = TempDir::new().unwrap();
    let services = services(&tmp, "sqlite").await;
    let key = RepoKey::new("alice", "demo");
    services.coordinator.train(&key, false, false).await.unwrap();

    let repo = services.repo_path(&key);
    fs::remove_file(repo.join("src/render.rs")).unwrap();
    services.coordinator.train(&key, true, false).await.unwrap();
    services.coordinator.train(&key, true, false).await.unwrap();

    let engine = services.registry.get(&key).await.unwrap();
    assert_eq!(engine.table().row_count().await.unwrap(), 2);
    let records = services
        .search(&key, &request("draw the frame", Some(10)))
        .await
        .unwrap();
    assert!(records.iter().all(|r| r.filename != "render.rs"));
}

#[tokio::test]
async fn test_search_unknown_and_untrained_are_not_found() {
    let tmp = TempDir::new().unwrap();
    let services = services(&tmp, "memory").await;

    let err = services
        .search(&RepoKey::new("nobody", "nothing"), &request("x", None))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let key = RepoKey::new("alice", "demo");
    services.registry.get_or_create(&key).await.unwrap();
    let err = services.search(&key, &request("x", None)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(!services.is_trained("alice/demo").await.unwrap());
    assert!(matches!(
        services.is_trained("not-a-token").await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_search_results_are_projected() {
    let tmp = TempDir::new().unwrap();
    let services = services(&tmp, "sqlite").await;
    let key = RepoKey::new("alice", "demo");
    services.coordinator.train(&key, false, false).await.unwrap();

    let records = services
        .search(&key, &request("parse config", Some(2)))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    for record in &records {
        assert!(!record.filename.contains('/'));
        assert!(record.text.lines().count() <= 5);
        assert!(record
            .link
            .starts_with("https://github.com/alice/demo/blob/HEAD/"));
    }

    let parser = records
        .iter()
        .find(|r| r.filename == "parser.py")
        .expect("parser.py ranks in the top two");
    assert_eq!(
        parser.link,
        "https://github.com/alice/demo/blob/HEAD/src/parser.py"
    );
    assert_eq!(parser.language, "Python");
    assert_eq!(parser.text.lines().count(), 5);
}

#[tokio::test]
async fn test_language_filter_and_unknown_language() {
    let tmp = TempDir::new().unwrap();
    let services = services(&tmp, "memory").await;
    let key = RepoKey::new("alice", "demo");
    services.coordinator.train(&key, false, false).await.unwrap();

    let records = services
        .search(
            &key,
            &SearchRequest {
                query: "parse config",
                language: Some("rust"),
                limit: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "render.rs");

    let err = services
        .search(
            &key,
            &SearchRequest {
                query: "parse config",
                language: Some("Klingon"),
                limit: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_sqlite_index_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let key = RepoKey::new("alice", "demo");
    {
        let services = services(&tmp, "sqlite").await;
        services.coordinator.train(&key, false, false).await.unwrap();
    }

    let mut config = Config::rooted_at(tmp.path());
    config.storage.backend = "sqlite".to_string();
    let services = Services::with_hosting(config, Arc::new(NoHosting))
        .await
        .unwrap();
    assert_eq!(services.warm_up().await.unwrap(), 0);
    assert!(services.is_trained("alice/demo").await.unwrap());

    let records = services
        .search(&key, &request("parse config", None))
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
}
