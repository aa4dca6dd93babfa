//! Core data models shared by the extractor, the table stores and the
//! query engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use crate::error::EngineError;
use crate::language::Language;

/// Identity of one repository index: the `(owner, repo)` pair.
///
/// Serializes as `{"user": ..., "repo": ...}`, the shape of the index
/// manifest, and displays as the polling token `"owner/repo"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoKey {
    #[serde(rename = "user")]
    pub owner: String,
    pub repo: String,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Build a key from untrusted input. Both parts must be a single
    /// normal path component, since the key becomes `{root}/{owner}/{repo}`.
    pub fn parse(owner: &str, repo: &str) -> Result<Self, EngineError> {
        check_component("user", owner)?;
        check_component("repo", repo)?;
        Ok(Self::new(owner, repo))
    }

    /// Re-check a key that may have been built with [`RepoKey::new`].
    pub fn validate(&self) -> Result<(), EngineError> {
        check_component("user", &self.owner)?;
        check_component("repo", &self.repo)
    }

    /// The `"owner/repo"` token handed out by `/train` and accepted by
    /// `/is_trained`.
    pub fn token(&self) -> String {
        self.to_string()
    }
}

/// Reject anything that is not exactly one plain directory name: empty
/// strings, `.`, `..`, separators, drive prefixes, NUL and absolute paths.
pub fn check_component(what: &str, name: &str) -> Result<(), EngineError> {
    let invalid = || EngineError::InvalidRequest(format!("invalid {}: {:?}", what, name));
    if name.is_empty() || name.contains(['/', '\\', ':', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name => Ok(()),
        _ => Err(invalid()),
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [owner, repo] => RepoKey::parse(owner, repo)
                .map_err(|_| EngineError::NotFound(format!("{} is not a valid index", s))),
            _ => Err(EngineError::NotFound(format!("{} is not a valid index", s))),
        }
    }
}

/// One indexable unit: a whole source file.
///
/// `filename` is the path the extractor saw (absolute, under the
/// repository root) and is the dedup key at query time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub filename: String,
    pub language: Language,
    pub text: String,
    /// Size of the file on disk.
    pub bytes: u64,
}

/// A ranked row returned by a table's similarity search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub snippet: Snippet,
    /// Cosine similarity, or a re-ranker's blended score.
    pub score: f64,
}

/// The fixed-shape record returned to search clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Preview: first lines of the snippet text.
    pub text: String,
    pub language: String,
    /// Base name of the file.
    pub filename: String,
    /// Hosting-platform URL of the file.
    pub link: String,
}
