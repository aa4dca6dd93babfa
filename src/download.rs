//! Bulk repository downloads with per-job retry.
//!
//! A bulk download lists every repository of a user and fetches each one
//! into `{repo_root}/{user}/{repo}`. Jobs run concurrently, bounded by
//! `download.max_concurrency`. A failed attempt is logged, its permit is
//! released, and the job sleeps `base × 2^(attempt-1)` seconds (capped at
//! `max_backoff_secs`) before competing for a permit again. After
//! `max_retries` retries the job is marked failed.
//!
//! Progress is kept in an in-memory status map (`"Attempt N"`,
//! `"Complete"`, `"Failed: ..."`) that is reset whenever a new bulk
//! download starts. Overlapping bulk downloads share the map; the last
//! writer wins.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use snippet_search_core::error::{EngineError, EngineResult};
use snippet_search_core::models::check_component;

use crate::config::DownloadConfig;
use crate::hosting::HostingClient;

pub const STATUS_COMPLETE: &str = "Complete";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DownloadSnapshot {
    pub user: Option<String>,
    pub started: Option<DateTime<Utc>>,
    pub repos: BTreeMap<String, String>,
    /// Set when the repository listing itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(config: &DownloadConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    let secs = config
        .base_backoff_secs
        .saturating_mul(factor)
        .min(config.max_backoff_secs);
    Duration::from_secs(secs)
}

pub struct DownloadJobs {
    client: Arc<dyn HostingClient>,
    repo_root: PathBuf,
    config: DownloadConfig,
    state: Mutex<DownloadSnapshot>,
}

impl DownloadJobs {
    pub fn new(client: Arc<dyn HostingClient>, repo_root: PathBuf, config: DownloadConfig) -> Self {
        Self {
            client,
            repo_root,
            config,
            state: Mutex::new(DownloadSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut DownloadSnapshot)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    fn set_status(&self, repo: &str, status: String) {
        self.update(|s| {
            s.repos.insert(repo.to_string(), status);
        });
    }

    fn reset(&self, user: &str) {
        self.update(|s| {
            *s = DownloadSnapshot {
                user: Some(user.to_string()),
                started: Some(Utc::now()),
                repos: BTreeMap::new(),
                error: None,
            }
        });
    }

    /// Reset the status map and start a bulk download in the background.
    pub fn start(self: &Arc<Self>, user: &str) -> DownloadSnapshot {
        self.reset(user);
        let jobs = Arc::clone(self);
        let user = user.to_string();
        tokio::spawn(async move {
            jobs.run_jobs(&user).await;
        });
        self.snapshot()
    }

    /// Run a bulk download to completion and return the final snapshot.
    pub async fn run(self: &Arc<Self>, user: &str) -> DownloadSnapshot {
        self.reset(user);
        self.run_jobs(user).await;
        self.snapshot()
    }

    async fn run_jobs(self: &Arc<Self>, user: &str) {
        if let Err(e) = check_component("user", user) {
            tracing::error!(user, error = %e, "refusing download");
            self.update(|s| s.error = Some(e.to_string()));
            return;
        }
        let names = match self.client.list_repositories(user).await {
            Ok(names) => names,
            Err(e) => {
                tracing::error!(user, error = %e, "failed to list repositories");
                self.update(|s| s.error = Some(e.to_string()));
                return;
            }
        };
        tracing::info!(user, repos = names.len(), "starting downloads");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut set = JoinSet::new();
        let mut failed = 0;
        for name in names {
            // Listed names become directories under the user's root.
            if let Err(e) = check_component("repo", &name) {
                tracing::error!(user, repo = %name, error = %e, "skipping repository");
                self.set_status(&name, format!("Failed: {}", e));
                failed += 1;
                continue;
            }
            let jobs = Arc::clone(self);
            let semaphore = semaphore.clone();
            let user = user.to_string();
            set.spawn(async move { jobs.download_one(&semaphore, &user, &name).await });
        }

        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(_)) => failed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "download task panicked");
                }
            }
        }
        tracing::info!(user, failed, "downloads finished");
    }

    async fn download_one(&self, semaphore: &Semaphore, user: &str, repo: &str) -> EngineResult<()> {
        let dest = self.repo_root.join(user).join(repo);
        let mut attempt = 1u32;
        loop {
            self.set_status(repo, format!("Attempt {}", attempt));
            let result = {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| EngineError::Download(e.to_string()))?;
                self.client.download(user, repo, &dest).await
            };

            match result {
                Ok(()) => {
                    self.set_status(repo, STATUS_COMPLETE.to_string());
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(user, repo, attempt, error = %e, "download attempt failed");
                    if attempt > self.config.max_retries {
                        self.set_status(repo, format!("Failed: {}", e));
                        return Err(EngineError::Download(format!("{}/{}: {}", user, repo, e)));
                    }
                    tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
