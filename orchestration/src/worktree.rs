//! Worktree manager — isolated working copies per task
//!
//! Each agent task gets its own git worktree so concurrent edits never
//! collide; the merge steward additionally uses short-lived detached
//! worktrees for merge attempts. [`GitWorktrees`] drives plain `git`
//! commands scoped to the repository.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Captured output of one git invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Trimmed stdout, the usual thing a caller wants
    pub fn out(&self) -> &str {
        self.stdout.trim()
    }
}

/// How to create a worktree
#[derive(Debug, Clone, Default)]
pub struct CreateWorktreeOptions {
    /// Create the branch as part of the add (`-b`)
    pub create_branch: bool,
    /// Commit-ish to base the worktree on; HEAD when absent
    pub base: Option<String>,
    /// Detached checkout (`--detach`), used for throwaway merge worktrees
    pub detach: bool,
}

/// How to remove a worktree
#[derive(Debug, Clone, Default)]
pub struct RemoveWorktreeOptions {
    /// Local branch to delete after removal, if any
    pub delete_branch: Option<String>,
    /// Also delete the branch on origin (only meaningful with a remote)
    pub delete_remote_branch: bool,
    /// Pass `--force` to `git worktree remove`
    pub force: bool,
}

/// Capability surface over isolated working copies
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    /// Root of the repository this manager is scoped to
    fn repo_root(&self) -> &Path;

    /// Create a worktree for `branch` at `path`
    async fn create_worktree(
        &self,
        branch: &str,
        path: &Path,
        opts: CreateWorktreeOptions,
    ) -> OrchestratorResult<()>;

    /// Remove a worktree and optionally its branches
    async fn remove_worktree(
        &self,
        path: &Path,
        opts: RemoveWorktreeOptions,
    ) -> OrchestratorResult<()>;

    /// The repository's default branch (e.g. `main`)
    async fn default_branch(&self) -> OrchestratorResult<String>;

    /// Whether a local branch exists
    async fn branch_exists(&self, name: &str) -> OrchestratorResult<bool>;

    /// Branch checked out at a path
    async fn current_branch(&self, path: &Path) -> OrchestratorResult<String>;

    /// Whether a worktree is registered at a path
    async fn worktree_exists(&self, path: &Path) -> OrchestratorResult<bool>;

    /// Whether the repository has an `origin` remote
    async fn has_remote(&self) -> OrchestratorResult<bool>;

    /// Run a git plumbing command scoped to `dir` (fetch, merge-base,
    /// merge-tree, merge, push, rev-parse, ...)
    async fn git(&self, dir: &Path, args: &[&str]) -> OrchestratorResult<GitOutput>;
}

/// Git-backed worktree manager
pub struct GitWorktrees {
    repo_root: PathBuf,
}

impl GitWorktrees {
    /// Create a manager for a repository root; fails unless `repo_root` is a
    /// git repository.
    pub async fn new(repo_root: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let repo_root = repo_root.into();
        let check = run_git(&repo_root, &["rev-parse", "--git-dir"]).await?;
        if !check.success {
            return Err(OrchestratorError::external(
                "worktree",
                "init",
                format!("not a git repository: {}", repo_root.display()),
            ));
        }
        Ok(Self { repo_root })
    }
}

async fn run_git(dir: &Path, args: &[&str]) -> OrchestratorResult<GitOutput> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| {
            OrchestratorError::external("worktree", format!("git {}", args.join(" ")), e.to_string())
        })?;
    Ok(GitOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Turn a failed git invocation into an external error with its stderr
fn expect_success(op: &str, out: GitOutput) -> OrchestratorResult<GitOutput> {
    if out.success {
        Ok(out)
    } else {
        Err(OrchestratorError::external(
            "worktree",
            op.to_string(),
            out.stderr.trim().to_string(),
        ))
    }
}

#[async_trait]
impl WorktreeManager for GitWorktrees {
    fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn create_worktree(
        &self,
        branch: &str,
        path: &Path,
        opts: CreateWorktreeOptions,
    ) -> OrchestratorResult<()> {
        if path.exists() {
            return Err(OrchestratorError::conflict(format!(
                "worktree path already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::external("worktree", "create", e.to_string())
            })?;
        }

        let path_str = path.display().to_string();
        let mut args: Vec<&str> = vec!["worktree", "add"];
        if opts.detach {
            args.push("--detach");
            args.push(&path_str);
            if let Some(base) = &opts.base {
                args.push(base);
            }
        } else if opts.create_branch {
            args.extend_from_slice(&["-b", branch, &path_str]);
            if let Some(base) = &opts.base {
                args.push(base);
            }
        } else {
            // Check out an existing branch; `base` does not apply
            args.push(&path_str);
            args.push(branch);
        }

        expect_success("worktree add", run_git(&self.repo_root, &args).await?)?;
        Ok(())
    }

    async fn remove_worktree(
        &self,
        path: &Path,
        opts: RemoveWorktreeOptions,
    ) -> OrchestratorResult<()> {
        let path_str = path.display().to_string();
        let mut args: Vec<&str> = vec!["worktree", "remove"];
        if opts.force {
            args.push("--force");
        }
        args.push(&path_str);

        let removed = run_git(&self.repo_root, &args).await?;
        if !removed.success {
            // Already-gone worktrees are fine; anything else is surfaced
            if path.exists() {
                return Err(OrchestratorError::external(
                    "worktree",
                    "worktree remove",
                    removed.stderr.trim().to_string(),
                ));
            }
            let _ = run_git(&self.repo_root, &["worktree", "prune"]).await;
        }

        if let Some(branch) = &opts.delete_branch {
            let del = run_git(&self.repo_root, &["branch", "-D", branch]).await?;
            if !del.success {
                warn!(branch, stderr = %del.stderr.trim(), "local branch delete failed");
            }
            if opts.delete_remote_branch && self.has_remote().await? {
                let del = run_git(&self.repo_root, &["push", "origin", "--delete", branch]).await?;
                if !del.success {
                    warn!(branch, stderr = %del.stderr.trim(), "remote branch delete failed");
                }
            }
        }
        Ok(())
    }

    async fn default_branch(&self) -> OrchestratorResult<String> {
        // Prefer the remote's HEAD; fall back to the local HEAD's branch
        let remote_head = run_git(
            &self.repo_root,
            &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"],
        )
        .await?;
        if remote_head.success {
            if let Some(name) = remote_head.out().strip_prefix("origin/") {
                return Ok(name.to_string());
            }
        }
        let local = expect_success(
            "symbolic-ref",
            run_git(&self.repo_root, &["symbolic-ref", "--short", "HEAD"]).await?,
        )?;
        Ok(local.out().to_string())
    }

    async fn branch_exists(&self, name: &str) -> OrchestratorResult<bool> {
        let refname = format!("refs/heads/{name}");
        let out = run_git(
            &self.repo_root,
            &["rev-parse", "--verify", "--quiet", &refname],
        )
        .await?;
        Ok(out.success)
    }

    async fn current_branch(&self, path: &Path) -> OrchestratorResult<String> {
        let out = expect_success(
            "rev-parse",
            run_git(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await?,
        )?;
        Ok(out.out().to_string())
    }

    async fn worktree_exists(&self, path: &Path) -> OrchestratorResult<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let listed = expect_success(
            "worktree list",
            run_git(&self.repo_root, &["worktree", "list", "--porcelain"]).await?,
        )?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Ok(listed
            .stdout
            .lines()
            .filter_map(|l| l.strip_prefix("worktree "))
            .any(|p| {
                let listed_path = Path::new(p);
                listed_path == path
                    || listed_path
                        .canonicalize()
                        .map(|c| c == canonical)
                        .unwrap_or(false)
            }))
    }

    async fn has_remote(&self) -> OrchestratorResult<bool> {
        let out = run_git(&self.repo_root, &["remote", "get-url", "origin"]).await?;
        Ok(out.success)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> OrchestratorResult<GitOutput> {
        run_git(dir, args).await
    }
}
