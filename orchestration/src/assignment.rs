//! Task assignment — binding tasks to agents
//!
//! Every operation follows the same shape: read the current task, compute a
//! patch, write it back through the store's version-gated update. A version
//! mismatch gets exactly one retry from a fresh read before surfacing as a
//! conflict.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    AgentId, AssignmentStatus, HandoffEntry, MergeStatus, SessionId, Task, TaskId, TaskStatus,
};
use crate::registry::AgentRegistry;
use crate::store::{
    map_store_error, require_task, update_with_retry, ElementStore, Patch, TaskFilter, TaskPatch,
};

/// Options for [`TaskAssignment::assign_to_agent`]
#[derive(Debug, Clone, Default)]
pub struct AssignOptions {
    /// Branch for agent work; derived from agent and title when absent
    pub branch: Option<String>,
    /// Worktree path; derived when absent
    pub worktree: Option<String>,
    /// Session to bind immediately, if one is already live
    pub session_id: Option<SessionId>,
    /// Also move the task to in_progress
    pub mark_as_started: bool,
}

/// Options for [`TaskAssignment::handoff_task`]
#[derive(Debug, Clone)]
pub struct HandoffOptions {
    /// Session handing the task back
    pub session_id: Option<SessionId>,
    /// Why the task is going back to the pool
    pub message: String,
}

/// Filter for [`TaskAssignment::list_assignments`]
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub agent: Option<AgentId>,
    /// Any-of match when non-empty
    pub assignment_status: Vec<AssignmentStatus>,
    pub merge_status: Option<MergeStatus>,
}

/// Per-agent load summary
#[derive(Debug, Clone)]
pub struct AgentWorkload {
    pub agent_id: AgentId,
    pub in_progress: usize,
    pub by_status: HashMap<TaskStatus, usize>,
}

/// The assignment service
pub struct TaskAssignment {
    store: Arc<dyn ElementStore>,
    registry: Arc<dyn AgentRegistry>,
    actor: String,
}

impl TaskAssignment {
    pub fn new(store: Arc<dyn ElementStore>, registry: Arc<dyn AgentRegistry>) -> Self {
        Self {
            store,
            registry,
            actor: "task-assignment".to_string(),
        }
    }

    /// Bind a task to an agent, populating the orchestrator metadata
    pub async fn assign_to_agent(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        opts: AssignOptions,
    ) -> OrchestratorResult<Task> {
        let agent = self
            .registry
            .get(agent_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("agent", agent_id.as_str()))?;

        let mark_as_started = opts.mark_as_started;
        if mark_as_started && !self.agent_has_capacity(agent_id).await? {
            return Err(OrchestratorError::constraint(format!(
                "agent {} is at its concurrency cap of {}",
                agent_id, agent.max_concurrent_tasks
            )));
        }

        let agent_name = agent.name.clone();
        let updated = update_with_retry(self.store.as_ref(), task_id, &self.actor, move |task| {
            let slug = slug(&task.title);
            let branch = opts
                .branch
                .clone()
                .unwrap_or_else(|| format!("agent/{agent_name}/{}-{slug}", task.id));
            let worktree = opts
                .worktree
                .clone()
                .unwrap_or_else(|| format!(".stoneforge/.worktrees/{agent_name}-{slug}"));

            let mut metadata = task.metadata.clone();
            {
                let orch = metadata.orchestrator.get_or_insert_with(Default::default);
                orch.assigned_agent = Some(agent_id.clone());
                orch.branch = Some(branch);
                orch.worktree = Some(worktree);
                orch.session_id = opts.session_id.clone();
                if mark_as_started {
                    orch.started_at = Some(Utc::now());
                } else if task.status != TaskStatus::Review {
                    orch.merge_status = Some(MergeStatus::Pending);
                }
            }

            let mut patch = TaskPatch {
                assignee: Patch::set(agent_id.clone()),
                metadata: Some(metadata),
                ..Default::default()
            };
            if mark_as_started {
                patch.status = Some(TaskStatus::InProgress);
            }
            Ok(patch)
        })
        .await?;

        info!(
            task = %task_id,
            agent = %agent_id,
            started = mark_as_started,
            "task assigned"
        );
        Ok(updated)
    }

    /// Release a task from its agent without touching its status.
    /// The branch survives for a later re-assignment.
    pub async fn unassign_task(&self, task_id: &TaskId) -> OrchestratorResult<Task> {
        let updated = update_with_retry(self.store.as_ref(), task_id, &self.actor, |task| {
            let mut metadata = task.metadata.clone();
            if let Some(orch) = metadata.orchestrator.as_mut() {
                orch.assigned_agent = None;
                orch.session_id = None;
                orch.worktree = None;
            }
            Ok(TaskPatch {
                assignee: Patch::Clear,
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await?;
        info!(task = %task_id, "task unassigned");
        Ok(updated)
    }

    /// Move a task to in_progress; a no-op when it already is
    pub async fn start_task(
        &self,
        task_id: &TaskId,
        session_id: Option<SessionId>,
    ) -> OrchestratorResult<Task> {
        let current = require_task(self.store.as_ref(), task_id).await?;
        if current.status == TaskStatus::InProgress {
            if let Some(sid) = session_id {
                return update_with_retry(self.store.as_ref(), task_id, &self.actor, move |task| {
                    let mut metadata = task.metadata.clone();
                    metadata
                        .orchestrator
                        .get_or_insert_with(Default::default)
                        .session_id = Some(sid.clone());
                    Ok(TaskPatch {
                        metadata: Some(metadata),
                        ..Default::default()
                    })
                })
                .await;
            }
            return Ok(current);
        }

        let Some(assignee) = current.assignee.clone() else {
            return Err(OrchestratorError::conflict(format!(
                "cannot start unassigned task {task_id}"
            )));
        };
        if !self.agent_has_capacity(&assignee).await? {
            return Err(OrchestratorError::constraint(format!(
                "agent {assignee} is at its concurrency cap"
            )));
        }

        update_with_retry(self.store.as_ref(), task_id, &self.actor, move |task| {
            let mut metadata = task.metadata.clone();
            let orch = metadata.orchestrator.get_or_insert_with(Default::default);
            orch.started_at = Some(Utc::now());
            if let Some(sid) = &session_id {
                orch.session_id = Some(sid.clone());
            }
            Ok(TaskPatch {
                status: Some(TaskStatus::InProgress),
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await
    }

    /// Agent-declared completion: the task moves to review and becomes
    /// visible to the merge steward.
    pub async fn complete_task(&self, task_id: &TaskId) -> OrchestratorResult<Task> {
        let updated = update_with_retry(self.store.as_ref(), task_id, &self.actor, |task| {
            match task.status {
                TaskStatus::Closed => {
                    return Err(OrchestratorError::conflict(format!(
                        "task {} is already closed",
                        task.id
                    )))
                }
                TaskStatus::Review => {
                    return Err(OrchestratorError::conflict(format!(
                        "task {} is already in review",
                        task.id
                    )))
                }
                _ => {}
            }
            let mut metadata = task.metadata.clone();
            let orch = metadata.orchestrator.get_or_insert_with(Default::default);
            orch.completed_at = Some(Utc::now());
            orch.merge_status = Some(MergeStatus::Pending);
            Ok(TaskPatch {
                status: Some(TaskStatus::Review),
                assignee: Patch::Clear,
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await?;
        info!(task = %task_id, "task completed, awaiting merge");
        Ok(updated)
    }

    /// Hand a task back to the worker pool, hiding it from the merge
    /// pipeline and recording the handoff.
    pub async fn handoff_task(
        &self,
        task_id: &TaskId,
        opts: HandoffOptions,
    ) -> OrchestratorResult<Task> {
        let updated = update_with_retry(self.store.as_ref(), task_id, &self.actor, move |task| {
            let mut metadata = task.metadata.clone();
            let orch = metadata.orchestrator.get_or_insert_with(Default::default);
            let now = Utc::now();

            // The prior owner's context moves aside for the next owner
            orch.handoff_branch = orch.branch.take();
            orch.handoff_worktree = orch.worktree.take();
            orch.last_session_id = orch.session_id.take();
            orch.handoff_at = Some(now);
            orch.assigned_agent = None;
            // A handed-off task must disappear from the merge pipeline
            orch.merge_status = None;
            orch.handoff_history.push(HandoffEntry {
                session_id: opts.session_id.clone(),
                message: opts.message.clone(),
                at: now,
            });

            Ok(TaskPatch {
                status: Some(TaskStatus::Open),
                assignee: Patch::Clear,
                metadata: Some(metadata),
                ..Default::default()
            })
        })
        .await?;
        info!(task = %task_id, "task handed back to the pool");
        Ok(updated)
    }

    /// In-progress count and status distribution for one agent
    pub async fn get_agent_workload(&self, agent_id: &AgentId) -> OrchestratorResult<AgentWorkload> {
        let tasks = self
            .store
            .list_tasks(&TaskFilter {
                assignee: Some(agent_id.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| map_store_error(e, "list"))?;

        let mut by_status: HashMap<TaskStatus, usize> = HashMap::new();
        for task in &tasks {
            *by_status.entry(task.status).or_insert(0) += 1;
        }
        Ok(AgentWorkload {
            agent_id: agent_id.clone(),
            in_progress: by_status
                .get(&TaskStatus::InProgress)
                .copied()
                .unwrap_or(0),
            by_status,
        })
    }

    /// Whether the agent can take more in-progress work
    pub async fn agent_has_capacity(&self, agent_id: &AgentId) -> OrchestratorResult<bool> {
        let agent = self
            .registry
            .get(agent_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("agent", agent_id.as_str()))?;
        let workload = self.get_agent_workload(agent_id).await?;
        Ok(workload.in_progress < agent.max_concurrent_tasks as usize)
    }

    /// Tasks in review with a pending merge marker
    pub async fn tasks_awaiting_merge(&self) -> OrchestratorResult<Vec<Task>> {
        let review = self
            .store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Review),
                ..Default::default()
            })
            .await
            .map_err(|e| map_store_error(e, "list"))?;
        Ok(review
            .into_iter()
            .filter(|t| t.merge_status() == Some(MergeStatus::Pending))
            .collect())
    }

    /// Query assignments by agent, derived status, or merge status
    pub async fn list_assignments(
        &self,
        filter: AssignmentFilter,
    ) -> OrchestratorResult<Vec<Task>> {
        let tasks = self
            .store
            .list_tasks(&TaskFilter {
                assignee: filter.agent.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| map_store_error(e, "list"))?;

        Ok(tasks
            .into_iter()
            .filter(|t| {
                (filter.assignment_status.is_empty()
                    || filter.assignment_status.contains(&t.assignment_status()))
                    && (filter.merge_status.is_none() || t.merge_status() == filter.merge_status)
            })
            .collect())
    }
}

/// Branch-safe slug of a task title: lowercase, non-alphanumerics collapsed
/// to single dashes, at most 30 characters.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.truncate(30);
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Agent, AgentRole, Task};
    use crate::registry::InMemoryRegistry;
    use crate::store::MemoryStore;

    async fn fixture() -> (Arc<MemoryStore>, Arc<InMemoryRegistry>, TaskAssignment) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        registry
            .put(
                Agent::new(
                    AgentId::parse("ag-wk1").unwrap(),
                    "wk1",
                    AgentRole::Worker,
                )
                .with_max_concurrent_tasks(2),
            )
            .await;
        let assignment = TaskAssignment::new(store.clone(), registry.clone());
        (store, registry, assignment)
    }

    async fn seed_task(store: &MemoryStore, raw: &str, title: &str) -> TaskId {
        let id = TaskId::parse(raw).unwrap();
        store
            .create_task(Task::new(id.clone(), title))
            .await
            .unwrap();
        id
    }

    fn wk1() -> AgentId {
        AgentId::parse("ag-wk1").unwrap()
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Fix the Login Bug!"), "fix-the-login-bug");
        assert_eq!(slug("weird___chars &&& stuff"), "weird-chars-stuff");
        assert!(slug("a very long title that keeps going and going").len() <= 30);
        assert!(!slug("trailing punctuation...").ends_with('-'));
    }

    #[tokio::test]
    async fn test_assign_populates_metadata() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "Fix the login bug").await;

        let task = assignment
            .assign_to_agent(&id, &wk1(), AssignOptions::default())
            .await
            .unwrap();

        assert_eq!(task.assignee, Some(wk1()));
        let orch = task.orchestrator().unwrap();
        assert_eq!(orch.assigned_agent, Some(wk1()));
        assert_eq!(
            orch.branch.as_deref(),
            Some("agent/wk1/el-abc1-fix-the-login-bug")
        );
        assert_eq!(
            orch.worktree.as_deref(),
            Some(".stoneforge/.worktrees/wk1-fix-the-login-bug")
        );
        // Not started, not in review: the pending marker is set
        assert_eq!(orch.merge_status, Some(MergeStatus::Pending));
        assert_eq!(task.status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_assign_mark_as_started() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "Fix the login bug").await;

        let task = assignment
            .assign_to_agent(
                &id,
                &wk1(),
                AssignOptions {
                    mark_as_started: true,
                    session_id: Some("sess-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::InProgress);
        let orch = task.orchestrator().unwrap();
        assert!(orch.started_at.is_some());
        assert_eq!(orch.session_id.as_deref(), Some("sess-1"));
        assert_eq!(orch.merge_status, None);
    }

    #[tokio::test]
    async fn test_assign_unknown_agent_or_task() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "demo").await;

        let err = assignment
            .assign_to_agent(
                &id,
                &AgentId::parse("ag-zzz").unwrap(),
                AssignOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = assignment
            .assign_to_agent(
                &TaskId::parse("el-zzz").unwrap(),
                &wk1(),
                AssignOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_capacity_enforced_on_start() {
        let (store, _registry, assignment) = fixture().await;
        // Cap is 2
        for raw in ["el-aaa", "el-bbb", "el-ccc"] {
            let id = seed_task(&store, raw, "work").await;
            let result = assignment
                .assign_to_agent(
                    &id,
                    &wk1(),
                    AssignOptions {
                        mark_as_started: true,
                        ..Default::default()
                    },
                )
                .await;
            if raw == "el-ccc" {
                assert_eq!(result.unwrap_err().kind(), "constraint");
            } else {
                result.unwrap();
            }
        }
        assert!(!assignment.agent_has_capacity(&wk1()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unassign_preserves_branch() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "demo").await;
        assignment
            .assign_to_agent(&id, &wk1(), AssignOptions::default())
            .await
            .unwrap();

        let task = assignment.unassign_task(&id).await.unwrap();
        assert!(task.assignee.is_none());
        let orch = task.orchestrator().unwrap();
        assert!(orch.assigned_agent.is_none());
        assert!(orch.worktree.is_none());
        assert!(orch.session_id.is_none());
        assert!(orch.branch.is_some());
        assert_eq!(task.status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "demo").await;
        assignment
            .assign_to_agent(&id, &wk1(), AssignOptions::default())
            .await
            .unwrap();

        let first = assignment
            .start_task(&id, Some("sess-1".into()))
            .await
            .unwrap();
        assert_eq!(first.status, TaskStatus::InProgress);

        let again = assignment.start_task(&id, None).await.unwrap();
        assert_eq!(again.status, TaskStatus::InProgress);
        assert_eq!(
            again.orchestrator().unwrap().session_id.as_deref(),
            Some("sess-1")
        );
    }

    #[tokio::test]
    async fn test_start_unassigned_is_conflict() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "demo").await;
        let err = assignment.start_task(&id, None).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_complete_surfaces_to_merge_pipeline() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "demo").await;
        assignment
            .assign_to_agent(
                &id,
                &wk1(),
                AssignOptions {
                    mark_as_started: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let task = assignment.complete_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Review);
        assert!(task.assignee.is_none());
        let orch = task.orchestrator().unwrap();
        assert_eq!(orch.merge_status, Some(MergeStatus::Pending));
        assert!(orch.completed_at.is_some());

        let awaiting = assignment.tasks_awaiting_merge().await.unwrap();
        assert_eq!(awaiting.len(), 1);

        // Completing again is an illegal transition
        let err = assignment.complete_task(&id).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_handoff_hides_from_merge_pipeline() {
        let (store, _registry, assignment) = fixture().await;
        let id = seed_task(&store, "el-abc1", "demo").await;
        assignment
            .assign_to_agent(
                &id,
                &wk1(),
                AssignOptions {
                    mark_as_started: true,
                    session_id: Some("sess-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assignment.complete_task(&id).await.unwrap();

        let task = assignment
            .handoff_task(
                &id,
                HandoffOptions {
                    session_id: Some("sess-1".into()),
                    message: "fix review feedback".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.assignee.is_none());
        let orch = task.orchestrator().unwrap();
        assert_eq!(orch.merge_status, None);
        assert!(orch.branch.is_none());
        assert!(orch.handoff_branch.is_some());
        assert_eq!(orch.handoff_history.len(), 1);
        assert_eq!(orch.handoff_history[0].message, "fix review feedback");

        assert!(assignment.tasks_awaiting_merge().await.unwrap().is_empty());

        // Each handoff appends exactly one entry
        let task = assignment
            .handoff_task(
                &id,
                HandoffOptions {
                    session_id: None,
                    message: "second pass".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(task.orchestrator().unwrap().handoff_history.len(), 2);
    }

    #[tokio::test]
    async fn test_workload_distribution() {
        let (store, _registry, assignment) = fixture().await;
        let a = seed_task(&store, "el-aaa", "one").await;
        let b = seed_task(&store, "el-bbb", "two").await;
        assignment
            .assign_to_agent(
                &a,
                &wk1(),
                AssignOptions {
                    mark_as_started: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assignment
            .assign_to_agent(&b, &wk1(), AssignOptions::default())
            .await
            .unwrap();

        let workload = assignment.get_agent_workload(&wk1()).await.unwrap();
        assert_eq!(workload.in_progress, 1);
        assert_eq!(workload.by_status[&TaskStatus::InProgress], 1);
        assert_eq!(workload.by_status[&TaskStatus::Open], 1);
    }

    #[tokio::test]
    async fn test_list_assignments_filters() {
        let (store, _registry, assignment) = fixture().await;
        let a = seed_task(&store, "el-aaa", "one").await;
        let b = seed_task(&store, "el-bbb", "two").await;
        assignment
            .assign_to_agent(
                &a,
                &wk1(),
                AssignOptions {
                    mark_as_started: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assignment
            .assign_to_agent(&b, &wk1(), AssignOptions::default())
            .await
            .unwrap();

        let in_progress = assignment
            .list_assignments(AssignmentFilter {
                agent: Some(wk1()),
                assignment_status: vec![AssignmentStatus::InProgress],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, a);

        let pending = assignment
            .list_assignments(AssignmentFilter {
                merge_status: Some(MergeStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }
}
