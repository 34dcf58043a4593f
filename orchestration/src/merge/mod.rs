//! Merge steward — driving reviewed work into the trunk
//!
//! Picks up tasks awaiting merge, runs their tests inside the task worktree,
//! merges clean passes into the target branch through a throwaway detached
//! worktree, opens fix tasks for failures, and cleans up afterwards.
//!
//! Per-task state machine over `merge_status`:
//!
//! ```text
//! pending --runTests--> testing --pass--> merging --clean--> merged
//!                          |                 |--no commits--> not_applicable
//!                          |                 |--conflict----> conflict
//!                          |                 `--other-------> failed
//!                          `--fail--> test_failed
//! ```

mod fix;
mod runner;

pub use runner::{run_tests, TestRunOutcome};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::assignment::TaskAssignment;
use crate::dispatch::Dispatch;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::id::IdGenerator;
use crate::model::{FixType, MergeStatus, Task, TaskId, TaskStatus, TestResult};
use crate::store::{require_task, update_with_retry, ElementStore, Patch, TaskPatch};
use crate::worktree::{CreateWorktreeOptions, RemoveWorktreeOptions, WorktreeManager};

/// How a branch lands on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Squash,
    Merge,
}

/// Steward configuration; unknown options are rejected on deserialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Command run inside the task worktree
    pub test_command: String,
    /// Hard budget for one test run
    pub test_timeout_ms: u64,
    pub merge_strategy: MergeStrategy,
    /// Merge destination; the repository default branch when absent
    pub target_branch: Option<String>,
    /// Remove worktree and branches after a successful merge
    pub auto_cleanup: bool,
    /// Push `HEAD:{target}` after merging (only with a remote)
    pub auto_push_after_merge: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            test_command: "cargo test".to_string(),
            test_timeout_ms: 60_000,
            merge_strategy: MergeStrategy::Squash,
            target_branch: None,
            auto_cleanup: true,
            auto_push_after_merge: true,
        }
    }
}

/// Result of processing one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProcessOutcome {
    pub task_id: TaskId,
    pub merge_status: MergeStatus,
    pub merged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_task: Option<TaskId>,
    pub detail: String,
}

/// Summary from one batch scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_processed: usize,
    pub merged_count: usize,
    pub error_count: usize,
    pub results: Vec<TaskProcessOutcome>,
}

/// Classified merge failure
#[derive(Debug)]
enum MergeFailure {
    Conflict { files: Vec<String> },
    NoCommits,
    Other { message: String },
}

impl MergeFailure {
    fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// The merge steward service
pub struct MergeSteward {
    config: MergeConfig,
    store: Arc<dyn ElementStore>,
    assignment: Arc<TaskAssignment>,
    worktrees: Arc<dyn WorktreeManager>,
    dispatch: Arc<dyn Dispatch>,
    idgen: IdGenerator,
    actor: String,
}

impl MergeSteward {
    pub fn new(
        config: MergeConfig,
        store: Arc<dyn ElementStore>,
        assignment: Arc<TaskAssignment>,
        worktrees: Arc<dyn WorktreeManager>,
        dispatch: Arc<dyn Dispatch>,
    ) -> OrchestratorResult<Self> {
        Ok(Self {
            config,
            store,
            assignment,
            worktrees,
            dispatch,
            idgen: IdGenerator::new("el")?,
            actor: "merge-steward".to_string(),
        })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Process every task currently awaiting merge, serially
    pub async fn process_pending(&self) -> OrchestratorResult<BatchReport> {
        let pending = self.assignment.tasks_awaiting_merge().await?;
        let mut results = Vec::with_capacity(pending.len());
        let mut merged_count = 0;
        let mut error_count = 0;

        for task in &pending {
            match self.process_task(&task.id).await {
                Ok(outcome) => {
                    if outcome.merged {
                        merged_count += 1;
                    } else if matches!(
                        outcome.merge_status,
                        MergeStatus::Conflict | MergeStatus::TestFailed | MergeStatus::Failed
                    ) {
                        error_count += 1;
                    }
                    results.push(outcome);
                }
                Err(e) => {
                    error!(task = %task.id, error = %e, "merge processing failed");
                    error_count += 1;
                }
            }
        }

        info!(
            total = pending.len(),
            merged = merged_count,
            errors = error_count,
            "merge batch finished"
        );
        Ok(BatchReport {
            total_processed: pending.len(),
            merged_count,
            error_count,
            results,
        })
    }

    /// Drive one task through tests and merge
    pub async fn process_task(&self, task_id: &TaskId) -> OrchestratorResult<TaskProcessOutcome> {
        let task = require_task(self.store.as_ref(), task_id).await?;
        let orch = task.orchestrator().ok_or_else(|| {
            OrchestratorError::validation(format!("task {task_id} has no orchestrator metadata"))
        })?;

        // Already done: revisiting a finished task must not write anything
        if task.status == TaskStatus::Closed && orch.merge_status == Some(MergeStatus::Merged) {
            return Ok(TaskProcessOutcome {
                task_id: task_id.clone(),
                merge_status: MergeStatus::Merged,
                merged: true,
                fix_task: None,
                detail: "already merged".to_string(),
            });
        }

        let branch = orch.branch.clone().ok_or_else(|| {
            OrchestratorError::validation(format!("task {task_id} has no branch to merge"))
        })?;
        let worktree = orch.worktree.clone().ok_or_else(|| {
            OrchestratorError::validation(format!("task {task_id} has no worktree"))
        })?;

        info!(task = %task_id, branch, "processing task for merge");

        // Tests first; infrastructure failures here classify as `failed`
        let outcome = match self.run_task_tests(task_id, &branch, &worktree).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return self
                    .fail_task(&task, MergeStatus::Failed, FixType::General, &e.to_string(), &[])
                    .await;
            }
        };

        if !outcome.passed {
            let detail = format!(
                "{}\n\n{}",
                outcome.summary(),
                if outcome.stderr_tail.is_empty() {
                    &outcome.stdout_tail
                } else {
                    &outcome.stderr_tail
                }
            );
            return self
                .fail_task(&task, MergeStatus::TestFailed, FixType::TestFailure, &detail, &[])
                .await;
        }

        // Tests green: on to the merge
        self.set_merge_status(task_id, MergeStatus::Merging).await?;
        match self.attempt_merge(&task, &branch).await {
            Ok(commit) => self.finish_merge(task_id, &commit).await,
            Err(MergeFailure::NoCommits) => {
                info!(task = %task_id, "branch has no commits beyond target");
                let now = Utc::now();
                update_with_retry(self.store.as_ref(), task_id, &self.actor, move |fresh| {
                    let mut metadata = fresh.metadata.clone();
                    let orch = metadata.orchestrator.get_or_insert_with(Default::default);
                    orch.merge_status = Some(MergeStatus::NotApplicable);
                    Ok(TaskPatch {
                        status: Some(TaskStatus::Closed),
                        closed_at: Patch::set(now),
                        assignee: Patch::Clear,
                        metadata: Some(metadata),
                        ..Default::default()
                    })
                })
                .await?;
                Ok(TaskProcessOutcome {
                    task_id: task_id.clone(),
                    merge_status: MergeStatus::NotApplicable,
                    merged: false,
                    fix_task: None,
                    detail: "no commits to merge".to_string(),
                })
            }
            Err(MergeFailure::Conflict { files }) => {
                let detail = format!("merge conflict in {} file(s)", files.len());
                self.fail_task(&task, MergeStatus::Conflict, FixType::MergeConflict, &detail, &files)
                    .await
            }
            Err(MergeFailure::Other { message }) => {
                self.fail_task(&task, MergeStatus::Failed, FixType::General, &message, &[])
                    .await
            }
        }
    }

    /// Remove the task worktree and delete its branches
    ///
    /// Cleanup problems are reported back, never escalated: the merge
    /// already happened.
    pub async fn cleanup_after_merge(
        &self,
        task: &Task,
        delete_branch: bool,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        let Some(orch) = task.orchestrator() else {
            return problems;
        };

        let branch = orch.branch.clone();
        if let Some(worktree) = &orch.worktree {
            let path = self.resolve_path(worktree);
            match self.worktrees.worktree_exists(&path).await {
                Ok(true) => {
                    let opts = RemoveWorktreeOptions {
                        delete_branch: branch.clone().filter(|_| delete_branch),
                        delete_remote_branch: delete_branch,
                        force: true,
                    };
                    if let Err(e) = self.worktrees.remove_worktree(&path, opts).await {
                        problems.push(format!("worktree removal failed: {e}"));
                    }
                    return problems;
                }
                Ok(false) => {}
                Err(e) => problems.push(format!("worktree inspection failed: {e}")),
            }
        }

        // Worktree already gone; the branch may still need deleting
        if delete_branch {
            if let Some(branch) = branch {
                if let Err(e) = self.delete_branch(&branch).await {
                    problems.push(e);
                }
            }
        }
        problems
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), String> {
        let repo = self.worktrees.repo_root().to_path_buf();
        match self.worktrees.branch_exists(branch).await {
            Ok(true) => {
                let out = self
                    .worktrees
                    .git(&repo, &["branch", "-D", branch])
                    .await
                    .map_err(|e| e.to_string())?;
                if !out.success {
                    return Err(format!("branch delete failed: {}", out.stderr.trim()));
                }
            }
            Ok(false) => {}
            Err(e) => return Err(e.to_string()),
        }
        if self.worktrees.has_remote().await.unwrap_or(false) {
            let out = self
                .worktrees
                .git(&repo, &["push", "origin", "--delete", branch])
                .await
                .map_err(|e| e.to_string())?;
            if !out.success {
                return Err(format!("remote branch delete failed: {}", out.stderr.trim()));
            }
        }
        Ok(())
    }

    async fn run_task_tests(
        &self,
        task_id: &TaskId,
        branch: &str,
        worktree: &str,
    ) -> OrchestratorResult<TestRunOutcome> {
        self.set_merge_status(task_id, MergeStatus::Testing).await?;

        let wt_path = self.resolve_path(worktree);
        if !self.worktrees.worktree_exists(&wt_path).await? {
            // The agent's worktree can be gone after a crash; rebuild it
            if !self.worktrees.branch_exists(branch).await? {
                return Err(OrchestratorError::external(
                    "worktree",
                    "test setup",
                    format!("branch {branch} does not exist"),
                ));
            }
            info!(task = %task_id, branch, "recreating missing task worktree");
            self.worktrees
                .create_worktree(branch, &wt_path, CreateWorktreeOptions::default())
                .await?;
        }

        let outcome = runner::run_tests(
            &self.config.test_command,
            &wt_path,
            self.config.test_timeout_ms,
        )
        .await;

        let result = TestResult {
            passed: outcome.passed,
            completed_at: Utc::now(),
            totals: outcome.totals,
        };
        update_with_retry(self.store.as_ref(), task_id, &self.actor, move |fresh| {
            let mut metadata = fresh.metadata.clone();
            let orch = metadata.orchestrator.get_or_insert_with(Default::default);
            orch.test_run_count += 1;
            orch.last_test_result = Some(result.clone());
            Ok(TaskPatch {
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await?;
        Ok(outcome)
    }

    /// Merge `branch` into the target through a throwaway detached worktree.
    /// No local-branch sync happens here; that is the caller's follow-up.
    async fn attempt_merge(&self, task: &Task, branch: &str) -> Result<String, MergeFailure> {
        let repo = self.worktrees.repo_root().to_path_buf();
        let has_remote = self
            .worktrees
            .has_remote()
            .await
            .map_err(|e| MergeFailure::other(e.to_string()))?;
        let target = self
            .target_branch()
            .await
            .map_err(|e| MergeFailure::other(e.to_string()))?;

        if has_remote {
            let fetch = self
                .git(&repo, &["fetch", "origin"])
                .await?;
            if !fetch.success {
                return Err(MergeFailure::other(format!(
                    "fetch failed: {}",
                    fetch.stderr.trim()
                )));
            }
        }
        let target_ref = if has_remote {
            format!("origin/{target}")
        } else {
            target.clone()
        };

        // Pre-flight: no commits, then conflicts, all without touching any
        // working copy
        let base = self.git(&repo, &["merge-base", &target_ref, branch]).await?;
        if !base.success {
            return Err(MergeFailure::other(format!(
                "no merge base between {target_ref} and {branch}: {}",
                base.stderr.trim()
            )));
        }
        let tip = self.git(&repo, &["rev-parse", branch]).await?;
        if !tip.success {
            return Err(MergeFailure::other(format!(
                "unknown branch {branch}: {}",
                tip.stderr.trim()
            )));
        }
        if base.out() == tip.out() {
            return Err(MergeFailure::NoCommits);
        }

        let tree = self
            .git(
                &repo,
                &["merge-tree", "--write-tree", "--name-only", &target_ref, branch],
            )
            .await?;
        if !tree.success {
            if tree.code == Some(1) {
                // Output is: tree oid, conflicted paths, blank line,
                // informational messages
                let files: Vec<String> = tree
                    .stdout
                    .lines()
                    .skip(1)
                    .take_while(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
                return Err(MergeFailure::Conflict { files });
            }
            return Err(MergeFailure::other(format!(
                "merge-tree failed: {}",
                tree.stderr.trim()
            )));
        }

        // The actual merge happens in a detached throwaway so the agent's
        // worktree stays untouched
        let merge_path = std::env::temp_dir()
            .join("stoneforge-merges")
            .join(task.id.as_str());
        if merge_path.exists() {
            let _ = self
                .worktrees
                .remove_worktree(
                    &merge_path,
                    RemoveWorktreeOptions {
                        force: true,
                        ..Default::default()
                    },
                )
                .await;
        }
        self.worktrees
            .create_worktree(
                "",
                &merge_path,
                CreateWorktreeOptions {
                    detach: true,
                    base: Some(target_ref),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MergeFailure::other(format!("throwaway worktree failed: {e}")))?;

        let merge_result = self
            .merge_in(&merge_path, branch, task, has_remote, &target)
            .await;

        // Nothing below may run git after this removal
        if let Err(e) = self
            .worktrees
            .remove_worktree(
                &merge_path,
                RemoveWorktreeOptions {
                    force: true,
                    ..Default::default()
                },
            )
            .await
        {
            warn!(task = %task.id, error = %e, "throwaway worktree removal failed");
        }

        merge_result
    }

    async fn merge_in(
        &self,
        dir: &Path,
        branch: &str,
        task: &Task,
        has_remote: bool,
        target: &str,
    ) -> Result<String, MergeFailure> {
        let message = format!("Merge task {}: {}", task.id, task.title);
        let merge_out = match self.config.merge_strategy {
            MergeStrategy::Squash => {
                let squashed = self.git(dir, &["merge", "--squash", branch]).await?;
                if !squashed.success {
                    return Err(classify_merge_failure(&squashed.stdout, &squashed.stderr));
                }
                self.git(dir, &["commit", "-m", &message]).await?
            }
            MergeStrategy::Merge => {
                self.git(dir, &["merge", "--no-ff", branch, "-m", &message])
                    .await?
            }
        };
        if !merge_out.success {
            return Err(classify_merge_failure(&merge_out.stdout, &merge_out.stderr));
        }

        let head = self.git(dir, &["rev-parse", "HEAD"]).await?;
        if !head.success {
            return Err(MergeFailure::other(format!(
                "rev-parse failed: {}",
                head.stderr.trim()
            )));
        }
        let commit = head.out().to_string();

        if self.config.auto_push_after_merge && has_remote {
            let refspec = format!("HEAD:{target}");
            let push = self.git(dir, &["push", "origin", &refspec]).await?;
            if !push.success {
                // A rejected push usually means another merge landed first
                return Err(MergeFailure::other(format!(
                    "push rejected: {}",
                    push.stderr.trim()
                )));
            }
        }
        Ok(commit)
    }

    async fn finish_merge(
        &self,
        task_id: &TaskId,
        commit: &str,
    ) -> OrchestratorResult<TaskProcessOutcome> {
        let now = Utc::now();
        update_with_retry(self.store.as_ref(), task_id, &self.actor, move |fresh| {
            let mut metadata = fresh.metadata.clone();
            let orch = metadata.orchestrator.get_or_insert_with(Default::default);
            orch.merge_status = Some(MergeStatus::Merged);
            orch.merged_at = Some(now);
            orch.merge_failure_reason = None;
            Ok(TaskPatch {
                status: Some(TaskStatus::Closed),
                closed_at: Patch::set(now),
                assignee: Patch::Clear,
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await?;
        info!(task = %task_id, commit, "task merged");

        let mut detail = format!("merged as {commit}");
        if self.config.auto_cleanup {
            // Re-read so cleanup sees the branch/worktree fields we kept
            let fresh = require_task(self.store.as_ref(), task_id).await?;
            for problem in self.cleanup_after_merge(&fresh, true).await {
                warn!(task = %task_id, problem, "post-merge cleanup issue");
                detail.push_str(&format!("; cleanup: {problem}"));
            }
        }

        // Local target sync happens here, deliberately outside AttemptMerge
        if let Err(problem) = self.sync_target_branch(commit).await {
            warn!(task = %task_id, problem, "target branch sync issue");
            detail.push_str(&format!("; sync: {problem}"));
        }

        Ok(TaskProcessOutcome {
            task_id: task_id.clone(),
            merge_status: MergeStatus::Merged,
            merged: true,
            fix_task: None,
            detail,
        })
    }

    /// Bring the local target branch up to the merged commit (or to origin
    /// when a remote exists). Failure leaves the merge standing.
    async fn sync_target_branch(&self, merged_commit: &str) -> Result<(), String> {
        let repo = self.worktrees.repo_root().to_path_buf();
        let has_remote = self.worktrees.has_remote().await.map_err(|e| e.to_string())?;
        let target = self.target_branch().await.map_err(|e| e.to_string())?;
        let current = self
            .worktrees
            .current_branch(&repo)
            .await
            .map_err(|e| e.to_string())?;

        if has_remote {
            self.repo_git_ok(&["fetch", "origin"]).await?;
            if current == target {
                self.repo_git_ok(&["merge", "--ff-only", &format!("origin/{target}")])
                    .await
            } else {
                self.repo_git_ok(&["fetch", "origin", &format!("{target}:{target}")])
                    .await
            }
        } else if current == target {
            self.repo_git_ok(&["merge", "--ff-only", merged_commit]).await
        } else {
            self.repo_git_ok(&["branch", "-f", &target, merged_commit])
                .await
        }
    }

    /// Run git at the repo root, flattening failures into a message
    async fn repo_git_ok(&self, args: &[&str]) -> Result<(), String> {
        let repo = self.worktrees.repo_root().to_path_buf();
        let out = self
            .worktrees
            .git(&repo, args)
            .await
            .map_err(|e| e.to_string())?;
        if out.success {
            Ok(())
        } else {
            Err(out.stderr.trim().to_string())
        }
    }

    /// Record a failure state and open (or reuse) the matching fix task
    async fn fail_task(
        &self,
        task: &Task,
        status: MergeStatus,
        fix_type: FixType,
        detail: &str,
        affected_files: &[String],
    ) -> OrchestratorResult<TaskProcessOutcome> {
        let reason = detail.to_string();
        update_with_retry(self.store.as_ref(), &task.id, &self.actor, move |fresh| {
            let mut metadata = fresh.metadata.clone();
            let orch = metadata.orchestrator.get_or_insert_with(Default::default);
            orch.merge_status = Some(status);
            orch.merge_failure_reason = Some(reason.clone());
            Ok(TaskPatch {
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await?;

        let fix_task = fix::ensure_fix_task(
            self.store.as_ref(),
            &self.idgen,
            self.dispatch.as_ref(),
            task,
            fix_type,
            detail,
            affected_files,
        )
        .await?;

        warn!(
            task = %task.id,
            merge_status = %status,
            fix_task = %fix_task,
            "merge pipeline failure"
        );
        Ok(TaskProcessOutcome {
            task_id: task.id.clone(),
            merge_status: status,
            merged: false,
            fix_task: Some(fix_task),
            detail: detail.to_string(),
        })
    }

    async fn set_merge_status(
        &self,
        task_id: &TaskId,
        status: MergeStatus,
    ) -> OrchestratorResult<Task> {
        update_with_retry(self.store.as_ref(), task_id, &self.actor, move |fresh| {
            let mut metadata = fresh.metadata.clone();
            metadata
                .orchestrator
                .get_or_insert_with(Default::default)
                .merge_status = Some(status);
            Ok(TaskPatch {
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await
    }

    async fn target_branch(&self) -> OrchestratorResult<String> {
        match &self.config.target_branch {
            Some(target) => Ok(target.clone()),
            None => self.worktrees.default_branch().await,
        }
    }

    fn resolve_path(&self, worktree: &str) -> PathBuf {
        let path = PathBuf::from(worktree);
        if path.is_absolute() {
            path
        } else {
            self.worktrees.repo_root().join(path)
        }
    }

    async fn git(
        &self,
        dir: &Path,
        args: &[&str],
    ) -> Result<crate::worktree::GitOutput, MergeFailure> {
        self.worktrees
            .git(dir, args)
            .await
            .map_err(|e| MergeFailure::other(e.to_string()))
    }
}

fn classify_merge_failure(stdout: &str, stderr: &str) -> MergeFailure {
    let combined = format!("{stdout}\n{stderr}");
    if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
        let files: Vec<String> = stdout
            .lines()
            .filter(|l| l.starts_with("CONFLICT"))
            .filter_map(|l| l.split_whitespace().last())
            .map(String::from)
            .collect();
        MergeFailure::Conflict { files }
    } else {
        MergeFailure::other(stderr.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MergeConfig::default();
        assert_eq!(config.test_command, "cargo test");
        assert_eq!(config.test_timeout_ms, 60_000);
        assert_eq!(config.merge_strategy, MergeStrategy::Squash);
        assert!(config.target_branch.is_none());
        assert!(config.auto_cleanup);
        assert!(config.auto_push_after_merge);
    }

    #[test]
    fn test_config_rejects_unknown_options() {
        assert!(serde_json::from_str::<MergeConfig>(r#"{"retry_budget": 3}"#).is_err());
        let partial: MergeConfig =
            serde_json::from_str(r#"{"merge_strategy": "merge", "auto_cleanup": false}"#).unwrap();
        assert_eq!(partial.merge_strategy, MergeStrategy::Merge);
        assert!(!partial.auto_cleanup);
        assert_eq!(partial.test_timeout_ms, 60_000);
    }

    #[test]
    fn test_classify_merge_failure() {
        let conflict = classify_merge_failure(
            "Auto-merging src/lib.rs\nCONFLICT (content): Merge conflict in src/lib.rs\n",
            "Automatic merge failed; fix conflicts and then commit the result.\n",
        );
        match conflict {
            MergeFailure::Conflict { files } => assert_eq!(files, vec!["src/lib.rs"]),
            other => panic!("expected conflict, got {other:?}"),
        }

        let other = classify_merge_failure("", "fatal: not something mergeable");
        assert!(matches!(other, MergeFailure::Other { .. }));
    }
}
