// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `git worktree` backed provider.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    default_work_dir, resolve_path, sanitize_name, CreateOptions, Worktree, WorktreeError,
    WorktreeProvider,
};

/// Fallback base branch when the repository's current branch is unknown.
const FALLBACK_BASE_BRANCH: &str = "main";

/// Manages worktrees of one repository under a shared work directory.
#[derive(Debug, Clone)]
pub struct GitWorktreeProvider {
    repo_path: PathBuf,
    work_dir: PathBuf,
}

impl GitWorktreeProvider {
    /// Create a provider. `work_dir` defaults to `~/hive-worktrees`. Both
    /// paths are canonicalised.
    pub fn new(repo_path: impl AsRef<Path>, work_dir: Option<PathBuf>) -> Self {
        let work_dir = work_dir.unwrap_or_else(default_work_dir);
        Self {
            repo_path: resolve_path(repo_path.as_ref()),
            work_dir: resolve_path(&work_dir),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn dir_for(&self, name: &str) -> Result<PathBuf, WorktreeError> {
        let dir = sanitize_name(name).ok_or_else(|| WorktreeError::InvalidName(name.to_string()))?;
        Ok(self.work_dir.join(dir))
    }

    /// Run a git command against `repo` and return trimmed stdout.
    async fn git_in(&self, repo: &Path, args: &[&str]) -> Result<String, WorktreeError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(WorktreeError::Git(if stderr.is_empty() {
                format!("git {} exited with {}", args.join(" "), output.status)
            } else {
                stderr
            }))
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, WorktreeError> {
        self.git_in(&self.repo_path, args).await
    }

    async fn branch_exists(&self, repo: &Path, branch: &str) -> bool {
        self.git_in(repo, &["rev-parse", "--verify", "--quiet", branch])
            .await
            .is_ok()
    }

    async fn current_branch(&self, repo: &Path) -> Option<String> {
        match self.git_in(repo, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Ok(branch) if !branch.is_empty() && branch != "HEAD" => Some(branch),
            _ => None,
        }
    }

    /// A path is a usable worktree when it has a `.git` link and git still
    /// lists it.
    async fn is_registered(&self, repo: &Path, path: &Path) -> bool {
        if !path.join(".git").exists() {
            return false;
        }
        match self.git_in(repo, &["worktree", "list", "--porcelain"]).await {
            Ok(output) => parse_worktree_list(&output)
                .iter()
                .any(|entry| resolve_path(&entry.path) == path),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl WorktreeProvider for GitWorktreeProvider {
    async fn create(&self, opts: CreateOptions) -> Result<Worktree, WorktreeError> {
        let path = self.dir_for(&opts.name)?;
        let repo = opts
            .repo_path
            .as_deref()
            .map(resolve_path)
            .unwrap_or_else(|| self.repo_path.clone());
        let branch = opts
            .branch
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| format!("hive/{}", opts.name));

        tokio::fs::create_dir_all(&self.work_dir).await?;

        if let Err(e) = self.git_in(&repo, &["worktree", "prune"]).await {
            debug!("worktree prune failed before create: {}", e);
        }

        let worktree = Worktree {
            name: opts.name.clone(),
            path: path.clone(),
            branch: branch.clone(),
            repo_path: repo.clone(),
            created: false,
        };

        if self.is_registered(&repo, &path).await {
            info!("Reusing existing worktree {} at {:?}", opts.name, path);
            return Ok(worktree);
        }

        if path.exists() {
            warn!("Removing orphaned worktree directory {:?}", path);
            tokio::fs::remove_dir_all(&path).await?;
        }

        let base = match opts.base_branch.clone().filter(|b| !b.is_empty()) {
            Some(base) => base,
            None => self
                .current_branch(&repo)
                .await
                .unwrap_or_else(|| FALLBACK_BASE_BRANCH.to_string()),
        };
        let path_str = path.to_string_lossy().to_string();

        if self.branch_exists(&repo, &branch).await {
            match self
                .git_in(&repo, &["worktree", "add", &path_str, &branch])
                .await
            {
                Ok(_) => {
                    info!("Created worktree {} on existing branch {}", opts.name, branch);
                    return Ok(Worktree {
                        created: true,
                        ..worktree
                    });
                }
                Err(e) => {
                    warn!(
                        "Branch {} exists but could not be checked out ({}), recreating from {}",
                        branch, e, base
                    );
                    let _ = self.git_in(&repo, &["branch", "-D", &branch]).await;
                }
            }
        }

        self.git_in(&repo, &["worktree", "add", "-b", &branch, &path_str, &base])
            .await
            .map_err(|e| WorktreeError::CreationFailed {
                name: opts.name.clone(),
                message: e.to_string(),
            })?;

        info!("Created worktree {} at {:?} ({} from {})", opts.name, path, branch, base);
        Ok(Worktree {
            created: true,
            ..worktree
        })
    }

    async fn delete(&self, name: &str) -> Result<(), WorktreeError> {
        let path = self.dir_for(name)?;
        let path_str = path.to_string_lossy().to_string();

        if let Err(e) = self.git(&["worktree", "remove", "--force", &path_str]).await {
            debug!("git worktree remove failed for {}: {}", name, e);
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }

        self.prune().await?;
        info!("Deleted worktree {}", name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Worktree>, WorktreeError> {
        let output = self.git(&["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&output)
            .into_iter()
            .filter_map(|entry| {
                let path = resolve_path(&entry.path);
                if !path.starts_with(&self.work_dir) || path == self.work_dir {
                    return None;
                }
                let name = path.file_name()?.to_string_lossy().to_string();
                Some(Worktree {
                    name,
                    path,
                    branch: entry.branch.unwrap_or_default(),
                    repo_path: self.repo_path.clone(),
                    created: false,
                })
            })
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<Worktree>, WorktreeError> {
        let Some(dir) = sanitize_name(name) else {
            return Ok(None);
        };
        Ok(self.list().await?.into_iter().find(|wt| wt.name == dir))
    }

    async fn prune(&self) -> Result<(), WorktreeError> {
        self.git(&["worktree", "prune"]).await.map(|_| ())
    }
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PorcelainEntry {
    path: PathBuf,
    branch: Option<String>,
}

fn parse_worktree_list(output: &str) -> Vec<PorcelainEntry> {
    let mut entries = Vec::new();
    let mut current = PorcelainEntry::default();

    for line in output.lines().map(str::trim) {
        if let Some(path) = line.strip_prefix("worktree ") {
            if !current.path.as_os_str().is_empty() {
                entries.push(std::mem::take(&mut current));
            }
            current.path = PathBuf::from(path);
        } else if let Some(branch) = line.strip_prefix("branch ") {
            current.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
        }
    }

    if !current.path.as_os_str().is_empty() {
        entries.push(current);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PORCELAIN: &str = "\
worktree /repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /home/me/hive-worktrees/front
HEAD 2222222222222222222222222222222222222222
branch refs/heads/hive/front

worktree /home/me/hive-worktrees/detached
HEAD 3333333333333333333333333333333333333333
detached
";

    #[test]
    fn test_parse_worktree_list() {
        let entries = parse_worktree_list(PORCELAIN);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, PathBuf::from("/repo"));
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("hive/front"));
        assert_eq!(entries[2].branch, None);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_worktree_list("").is_empty());
    }

    #[test]
    fn test_paths_are_canonical() {
        let dir = tempdir().unwrap();
        let provider = GitWorktreeProvider::new(dir.path(), Some(dir.path().join("trees")));
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(provider.repo_path(), canonical.as_path());
        assert_eq!(provider.work_dir(), canonical.join("trees").as_path());
    }

    #[test]
    fn test_dir_for_rejects_empty_name() {
        let provider = GitWorktreeProvider::new("/tmp", Some(PathBuf::from("/tmp/trees")));
        assert!(matches!(
            provider.dir_for(""),
            Err(WorktreeError::InvalidName(_))
        ));
        assert!(provider.dir_for("front").unwrap().ends_with("front"));
    }
}
