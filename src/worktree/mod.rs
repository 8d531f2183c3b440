// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Isolated git worktrees for agents.
//!
//! Every agent works in its own checkout so that concurrent edits never
//! collide. Worktrees live under a shared work directory, one directory per
//! agent name:
//!
//! ```text
//! ~/hive-worktrees/
//! ├── front/        # branch hive/front
//! └── back/         # branch hive/back
//! ```
//!
//! The [`WorktreeProvider`] trait is the seam the agent manager depends on;
//! [`GitWorktreeProvider`] implements it with `git worktree`.

mod git;

pub use git::GitWorktreeProvider;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for worktree operations.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Invalid worktree name: {0:?}")]
    InvalidName(String),

    #[error("Failed to create worktree {name}: {message}")]
    CreationFailed { name: String, message: String },
}

/// A worktree checked out for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    /// Logical name, also the directory name under the work dir.
    pub name: String,
    /// Absolute, canonical path of the checkout.
    pub path: PathBuf,
    /// Branch checked out in the worktree.
    pub branch: String,
    /// Repository the worktree belongs to.
    pub repo_path: PathBuf,
    /// Set when `create` added the checkout rather than reusing one.
    #[serde(default)]
    pub created: bool,
}

/// Options for [`WorktreeProvider::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: String,
    /// Repository override; the provider's repository when `None`.
    pub repo_path: Option<PathBuf>,
    /// Branch to check out; `hive/<name>` when `None`.
    pub branch: Option<String>,
    /// Branch to fork a new branch from; the repository's current branch
    /// (or `main`) when `None`.
    pub base_branch: Option<String>,
}

impl CreateOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_base_branch(mut self, base: Option<String>) -> Self {
        self.base_branch = base;
        self
    }

    pub fn with_repo_path(mut self, repo: Option<PathBuf>) -> Self {
        self.repo_path = repo;
        self
    }
}

/// Creates and removes isolated checkouts.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    /// Create (or reuse) the worktree for `opts.name`. Only a newly added
    /// checkout comes back with `created` set.
    async fn create(&self, opts: CreateOptions) -> Result<Worktree, WorktreeError>;

    /// Remove a worktree by name. Removing a missing worktree succeeds.
    async fn delete(&self, name: &str) -> Result<(), WorktreeError>;

    /// All worktrees under the work directory.
    async fn list(&self) -> Result<Vec<Worktree>, WorktreeError>;

    /// Look up a worktree by name.
    async fn get(&self, name: &str) -> Result<Option<Worktree>, WorktreeError>;

    /// Drop references to worktrees whose directories are gone.
    async fn prune(&self) -> Result<(), WorktreeError>;
}

/// Default parent directory for worktrees: `~/hive-worktrees`.
pub fn default_work_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("hive-worktrees")
}

/// Resolve symlinks in `path`.
///
/// If the path does not exist yet, the nearest existing ancestor is
/// resolved and the missing components are appended unchanged. This keeps
/// `/var/...` and `/private/var/...` from being treated as different trees.
pub fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }

    let mut missing = Vec::new();
    let mut current = path;
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            missing.push(name.to_os_string());
        }
        if let Ok(resolved) = std::fs::canonicalize(parent) {
            return missing
                .iter()
                .rev()
                .fold(resolved, |acc, component| acc.join(component));
        }
        current = parent;
    }
    path.to_path_buf()
}

/// Turn an agent name into a safe directory name.
///
/// Path separators and characters that are awkward in file names become
/// dashes. Returns `None` when nothing usable is left.
pub fn sanitize_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("front"), Some("front".to_string()));
        assert_eq!(sanitize_name("feat/auth"), Some("feat-auth".to_string()));
        assert_eq!(sanitize_name("my agent"), Some("my-agent".to_string()));
        assert_eq!(sanitize_name("../.."), None);
        assert_eq!(sanitize_name(""), None);
        assert_eq!(sanitize_name("  "), None);
    }

    #[test]
    fn test_resolve_existing_path() {
        let dir = tempdir().unwrap();
        let resolved = resolve_path(dir.path());
        assert_eq!(resolved, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_resolve_missing_path_keeps_tail() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("a").join("b");
        let resolved = resolve_path(&missing);
        assert_eq!(
            resolved,
            std::fs::canonicalize(dir.path()).unwrap().join("a").join("b")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_through_symlink() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let resolved = resolve_path(&link.join("worktrees"));
        assert_eq!(
            resolved,
            std::fs::canonicalize(&real).unwrap().join("worktrees")
        );
    }

    #[test]
    fn test_create_options_builder() {
        let opts = CreateOptions::new("front")
            .with_branch(Some("feature/x".to_string()))
            .with_base_branch(None)
            .with_repo_path(Some(PathBuf::from("/src/other")));
        assert_eq!(opts.name, "front");
        assert_eq!(opts.branch.as_deref(), Some("feature/x"));
        assert!(opts.base_branch.is_none());
        assert_eq!(opts.repo_path, Some(PathBuf::from("/src/other")));
    }
}
