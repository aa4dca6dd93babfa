//! Repository hosting client.
//!
//! [`HostingClient`] is the seam between download jobs and the hosting
//! platform. [`GitHubClient`] lists a user's repositories through the REST
//! API and fetches them with the `git` CLI: a shallow clone on first
//! download, `fetch` + `reset --hard` when a checkout already exists.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use snippet_search_core::search::BlobLinks;

use crate::config::HostingConfig;

const PER_PAGE: usize = 100;

#[async_trait]
pub trait HostingClient: Send + Sync {
    /// Names of every public repository owned by `user`.
    async fn list_repositories(&self, user: &str) -> Result<Vec<String>>;

    /// Materialize `user/repo` at `dest`, replacing any previous checkout.
    async fn download(&self, user: &str, repo: &str, dest: &Path) -> Result<()>;
}

#[derive(Deserialize)]
struct RepoListing {
    name: String,
}

pub struct GitHubClient {
    api_url: String,
    web_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: &HostingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("snips/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            web_url: config.web_url.trim_end_matches('/').to_string(),
            token: std::env::var(&config.token_env).ok().filter(|t| !t.is_empty()),
            client,
        })
    }

    pub fn clone_url(&self, user: &str, repo: &str) -> String {
        format!("{}/{}/{}.git", self.web_url, user, repo)
    }
}

#[async_trait]
impl HostingClient for GitHubClient {
    async fn list_repositories(&self, user: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for page in 1.. {
            let mut req = self
                .client
                .get(format!("{}/users/{}/repos", self.api_url, user))
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            let resp = req
                .send()
                .await
                .with_context(|| format!("Failed to list repositories for {}", user))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!("Repository listing for {} returned {}: {}", user, status, body);
            }

            let batch: Vec<RepoListing> = resp
                .json()
                .await
                .context("Failed to parse repository listing")?;
            let done = batch.len() < PER_PAGE;
            names.extend(batch.into_iter().map(|r| r.name));
            if done {
                break;
            }
        }
        Ok(names)
    }

    async fn download(&self, user: &str, repo: &str, dest: &Path) -> Result<()> {
        if dest.join(".git").exists() {
            git(&["fetch", "--depth", "1", "origin", "HEAD"], Some(dest)).await?;
            git(&["reset", "--hard", "FETCH_HEAD"], Some(dest)).await?;
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let dest_str = dest.to_string_lossy().to_string();
        let url = self.clone_url(user, repo);
        git(&["clone", "--depth", "1", &url, &dest_str], None).await
    }
}

async fn git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0], stderr.trim());
    }
    Ok(())
}

/// Link builder matching the configured web host and branch.
pub fn links(config: &HostingConfig) -> BlobLinks {
    BlobLinks {
        web_url: config.web_url.clone(),
        branch: config.branch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path as AxumPath, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use snippet_search_core::models::RepoKey;
    use snippet_search_core::search::LinkBuilder;
    use std::collections::HashMap;

    #[test]
    fn test_clone_url_and_links() {
        let config = HostingConfig::default();
        let client = GitHubClient::new(&config).unwrap();
        assert_eq!(
            client.clone_url("alice", "demo"),
            "https://github.com/alice/demo.git"
        );
        let link = links(&config).link(&RepoKey::new("alice", "demo"), "src/lib.rs");
        assert_eq!(link, "https://github.com/alice/demo/blob/HEAD/src/lib.rs");
    }

    async fn listing(
        AxumPath(user): AxumPath<String>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        let page: usize = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let count = if page == 1 { PER_PAGE } else { 3 };
        let repos: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({ "name": format!("{}-{}-{}", user, page, i) }))
            .collect();
        Json(serde_json::Value::Array(repos))
    }

    #[tokio::test]
    async fn test_list_repositories_paginates() {
        let app = Router::new().route("/users/{user}/repos", get(listing));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = HostingConfig {
            api_url: format!("http://{}", addr),
            token_env: "SNIPS_TEST_UNSET_TOKEN".to_string(),
            ..HostingConfig::default()
        };
        let client = GitHubClient::new(&config).unwrap();
        let names = client.list_repositories("alice").await.unwrap();
        assert_eq!(names.len(), PER_PAGE + 3);
        assert_eq!(names[0], "alice-1-0");
        assert_eq!(names.last().unwrap(), "alice-2-2");
    }
}
