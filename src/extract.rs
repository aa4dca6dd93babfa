//! Snippet extraction from a checked-out repository.
//!
//! [`extract`] walks a directory tree lazily and yields one [`Snippet`] per
//! accepted file. Directories are pruned by base name before descending,
//! so an excluded directory hides its whole subtree. Files are filtered by
//! base name, then read and classified.
//!
//! Individual unreadable or non-UTF-8 files are skipped and logged; they
//! never abort the walk.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use snippet_search_core::error::{EngineError, EngineResult};
use snippet_search_core::language::Language;
use snippet_search_core::models::Snippet;

use crate::config::TrainingConfig;

/// Directories that hold VCS metadata, dependencies, or build output.
pub const HEAVY_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    "target",
    "vendor",
    "dist",
    "build",
    "out",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".gradle",
    ".idea",
    ".vscode",
    ".next",
    "coverage",
];

/// Default directory predicate.
pub fn too_big(dir_name: &str) -> bool {
    HEAVY_DIRS.contains(&dir_name)
}

/// Default file predicate: the classifier has no language for the name.
pub fn is_not_supported(file_name: &str) -> bool {
    Language::classify_filename(file_name).is_none()
}

fn entry_name(entry: &DirEntry) -> String {
    entry.file_name().to_string_lossy().to_string()
}

/// Lazily extract snippets below `root`.
///
/// `exclude_dir` sees each directory's base name (never the root's);
/// `exclude_file` sees each regular file's base name. Fails only when the
/// root itself cannot be listed.
pub fn extract<D, F>(
    root: &Path,
    exclude_dir: D,
    exclude_file: F,
) -> EngineResult<impl Iterator<Item = Snippet>>
where
    D: FnMut(&str) -> bool,
    F: FnMut(&str) -> bool,
{
    walk(root, exclude_dir, exclude_file, None)
}

fn walk<D, F>(
    root: &Path,
    mut exclude_dir: D,
    mut exclude_file: F,
    max_file_bytes: Option<u64>,
) -> EngineResult<impl Iterator<Item = Snippet>>
where
    D: FnMut(&str) -> bool,
    F: FnMut(&str) -> bool,
{
    std::fs::read_dir(root).map_err(|e| {
        EngineError::Extraction(format!("cannot read {}: {}", root.display(), e))
    })?;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            e.depth() == 0 || !e.file_type().is_dir() || !exclude_dir(&entry_name(e))
        });

    Ok(walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                return None;
            }
        };
        if !entry.file_type().is_file() {
            return None;
        }

        let name = entry_name(&entry);
        if exclude_file(&name) {
            return None;
        }

        let path = entry.path();
        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if let Some(max) = max_file_bytes {
            if bytes > max {
                tracing::debug!(path = %path.display(), bytes, "skipping oversized file");
                return None;
            }
        }

        let Some(language) = Language::classify_filename(&name) else {
            tracing::warn!(path = %path.display(), "accepted file has no supported language");
            return None;
        };

        match std::fs::read_to_string(path) {
            Ok(text) => Some(Snippet {
                filename: path.to_string_lossy().to_string(),
                language,
                text,
                bytes,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                None
            }
        }
    }))
}

/// The configured extraction policy: built-in predicates plus the
/// `[training]` exclusions and size cap.
#[derive(Debug, Clone)]
pub struct Extractor {
    extra_dirs: Vec<String>,
    exclude_globs: GlobSet,
    max_file_bytes: u64,
}

impl Extractor {
    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_globs {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            extra_dirs: config.exclude_dirs.clone(),
            exclude_globs: builder.build()?,
            max_file_bytes: config.max_file_bytes,
        })
    }

    pub fn exclude_dir(&self, name: &str) -> bool {
        too_big(name) || self.extra_dirs.iter().any(|d| d == name)
    }

    pub fn exclude_file(&self, name: &str) -> bool {
        is_not_supported(name) || self.exclude_globs.is_match(name)
    }

    pub fn snippets(&self, root: &Path) -> EngineResult<impl Iterator<Item = Snippet> + '_> {
        walk(
            root,
            |d| self.exclude_dir(d),
            |f| self.exclude_file(f),
            Some(self.max_file_bytes),
        )
    }

    /// Owned variant for use inside `spawn_blocking`.
    pub fn into_snippets(self, root: PathBuf) -> EngineResult<impl Iterator<Item = Snippet>> {
        let dirs = self.clone();
        let max = self.max_file_bytes;
        walk(
            &root,
            move |d| dirs.exclude_dir(d),
            move |f| self.exclude_file(f),
            Some(max),
        )
    }
}
