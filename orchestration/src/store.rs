//! Element store seam
//!
//! The production catalog is an external SQL-backed service; the core only
//! speaks this narrow trait. Updates are version-gated: callers present the
//! `updated_at` they read, and a mismatch means someone else wrote first.
//! [`MemoryStore`] is the in-tree implementation used by the daemon and by
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::id::CollisionCheck;
use crate::model::{Agent, AgentId, Task, TaskId, TaskStatus, TaskType};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("element already exists: {0}")]
    AlreadyExists(String),

    #[error("version mismatch for {id}: expected updated_at {expected}, current {current}")]
    VersionMismatch {
        id: String,
        expected: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("invalid element: {0}")]
    Invalid(String),

    #[error("storage failure: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A field change that distinguishes "leave alone" from "clear"
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T> Patch<T> {
    pub fn set(value: T) -> Self {
        Self::Set(value)
    }

    /// Apply onto an optional field
    pub fn apply(self, slot: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Set(v) => *slot = Some(v),
            Self::Clear => *slot = None,
        }
    }
}

/// Partial update of a task; unset fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub body: Patch<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<u8>,
    pub complexity: Option<u8>,
    pub task_type: Option<TaskType>,
    pub assignee: Patch<AgentId>,
    pub tags: Option<Vec<String>>,
    pub closed_at: Patch<DateTime<Utc>>,
    /// Whole-record replacement; services read-modify-write the metadata bag
    pub metadata: Option<crate::model::TaskMetadata>,
}

impl TaskPatch {
    fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        self.body.apply(&mut task.body);
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(complexity) = self.complexity {
            task.complexity = complexity;
        }
        if let Some(task_type) = self.task_type {
            task.task_type = task_type;
        }
        self.assignee.apply(&mut task.assignee);
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        self.closed_at.apply(&mut task.closed_at);
        if let Some(metadata) = self.metadata {
            task.metadata = metadata;
        }
    }
}

/// Concurrency and attribution context for an update
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// The `updated_at` the caller read; the write fails if it is stale
    pub expected_updated_at: DateTime<Utc>,
    /// Who is writing
    pub actor: String,
}

/// Attribution context for a soft delete
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub actor: String,
    pub reason: String,
}

/// Property-equality filter over tasks, with tag containment and paging
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assignee: Option<AgentId>,
    pub task_type: Option<TaskType>,
    /// Every listed tag must be present on the task
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if task.assignee.as_ref() != Some(assignee) {
                return false;
            }
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        self.tags.iter().all(|t| task.has_tag(t))
    }
}

/// The element catalog as consumed by the orchestration core
#[async_trait]
pub trait ElementStore: Send + Sync {
    /// Fetch a task by id; `None` when absent or tombstoned
    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>>;

    /// List tasks matching a filter, ordered by creation time
    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;

    /// Insert a new task; the store assigns timestamps and `version = 1`
    async fn create_task(&self, task: Task) -> StoreResult<Task>;

    /// Apply a partial update under optimistic concurrency
    async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
        opts: UpdateOptions,
    ) -> StoreResult<Task>;

    /// Soft-delete: the element is tombstoned, not removed
    async fn delete_task(&self, id: &TaskId, opts: DeleteOptions) -> StoreResult<()>;
}

/// Translate a store failure into the core taxonomy
pub(crate) fn map_store_error(err: StoreError, operation: &str) -> OrchestratorError {
    match err {
        StoreError::NotFound(id) => OrchestratorError::not_found("task", id),
        StoreError::VersionMismatch { id, .. } => {
            OrchestratorError::conflict(format!("version mismatch updating {id}"))
        }
        other => OrchestratorError::external("store", operation.to_string(), other.to_string()),
    }
}

/// Fetch a task or fail with not-found
pub(crate) async fn require_task(
    store: &dyn ElementStore,
    task_id: &TaskId,
) -> OrchestratorResult<Task> {
    store
        .get_task(task_id)
        .await
        .map_err(|e| map_store_error(e, "get"))?
        .ok_or_else(|| OrchestratorError::not_found("task", task_id.as_str()))
}

/// Read, compute, write under the catalog's optimistic concurrency; one
/// retry from a fresh read on a version mismatch, then conflict.
pub(crate) async fn update_with_retry<F>(
    store: &dyn ElementStore,
    task_id: &TaskId,
    actor: &str,
    compute: F,
) -> OrchestratorResult<Task>
where
    F: Fn(&Task) -> OrchestratorResult<TaskPatch>,
{
    let task = require_task(store, task_id).await?;
    let patch = compute(&task)?;
    let first = store
        .update_task(
            task_id,
            patch,
            UpdateOptions {
                expected_updated_at: task.updated_at,
                actor: actor.to_string(),
            },
        )
        .await;

    match first {
        Ok(task) => Ok(task),
        Err(StoreError::VersionMismatch { .. }) => {
            let task = require_task(store, task_id).await?;
            let patch = compute(&task)?;
            store
                .update_task(
                    task_id,
                    patch,
                    UpdateOptions {
                        expected_updated_at: task.updated_at,
                        actor: actor.to_string(),
                    },
                )
                .await
                .map_err(|e| match e {
                    StoreError::VersionMismatch { id, .. } => OrchestratorError::conflict(
                        format!("persistent version mismatch updating {id}"),
                    ),
                    other => map_store_error(other, "update"),
                })
        }
        Err(other) => Err(map_store_error(other, "update")),
    }
}

#[derive(Debug, Clone)]
struct Tombstone {
    #[allow(dead_code)]
    actor: String,
    #[allow(dead_code)]
    reason: String,
    #[allow(dead_code)]
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    tombstone: Option<Tombstone>,
}

/// In-memory element store
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, StoredTask>>,
    agents: RwLock<HashMap<AgentId, Agent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an agent entity (agents are read through the registry seam;
    /// the memory store doubles as their catalog in tests and the daemon)
    pub async fn put_agent(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    pub async fn get_agent(&self, id: &AgentId) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Number of live (non-tombstoned) tasks
    pub async fn task_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|s| s.tombstone.is_none())
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Next `updated_at` for a write: strictly after the previous one even when
/// the wall clock has not advanced between two writes.
fn advance(current: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > current {
        now
    } else {
        current + Duration::nanoseconds(1)
    }
}

#[async_trait]
impl ElementStore for MemoryStore {
    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(id)
            .filter(|s| s.tombstone.is_none())
            .map(|s| s.task.clone()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|s| s.tombstone.is_none())
            .map(|s| &s.task)
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let offset = filter.offset.unwrap_or(0);
        let mut page: Vec<Task> = matched.into_iter().skip(offset).collect();
        if let Some(limit) = filter.limit {
            page.truncate(limit);
        }
        Ok(page)
    }

    async fn create_task(&self, mut task: Task) -> StoreResult<Task> {
        task.validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id.to_string()));
        }
        let now = Utc::now();
        task.created_at = now;
        task.updated_at = now;
        task.version = 1;
        tasks.insert(
            task.id.clone(),
            StoredTask {
                task: task.clone(),
                tombstone: None,
            },
        );
        Ok(task)
    }

    async fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
        opts: UpdateOptions,
    ) -> StoreResult<Task> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(id)
            .filter(|s| s.tombstone.is_none())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if stored.task.updated_at != opts.expected_updated_at {
            return Err(StoreError::VersionMismatch {
                id: id.to_string(),
                expected: opts.expected_updated_at,
                current: stored.task.updated_at,
            });
        }

        patch.apply(&mut stored.task);
        stored.task.updated_at = advance(stored.task.updated_at);
        stored.task.version += 1;
        Ok(stored.task.clone())
    }

    async fn delete_task(&self, id: &TaskId, opts: DeleteOptions) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        stored.tombstone = Some(Tombstone {
            actor: opts.actor,
            reason: opts.reason,
            at: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl CollisionCheck for MemoryStore {
    async fn exists(&self, id: &str) -> bool {
        let tasks = self.tasks.read().await;
        if tasks.keys().any(|k| k.as_str() == id) {
            return true;
        }
        let agents = self.agents.read().await;
        agents.keys().any(|k| k.as_str() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskMetadata;

    fn task(raw: &str) -> Task {
        Task::new(TaskId::parse(raw).unwrap(), "demo")
    }

    #[tokio::test]
    async fn test_create_assigns_bookkeeping() {
        let store = MemoryStore::new();
        let created = store.create_task(task("el-aaa")).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.created_at, created.updated_at);

        let fetched = store
            .get_task(&TaskId::parse("el-aaa").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_invalid() {
        let store = MemoryStore::new();
        store.create_task(task("el-aaa")).await.unwrap();
        assert!(matches!(
            store.create_task(task("el-aaa")).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let mut bad = task("el-bbb");
        bad.priority = 0;
        assert!(matches!(
            store.create_task(bad).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_update_is_version_gated() {
        let store = MemoryStore::new();
        let created = store.create_task(task("el-aaa")).await.unwrap();
        let id = created.id.clone();

        let updated = store
            .update_task(
                &id,
                TaskPatch {
                    status: Some(TaskStatus::Blocked),
                    ..Default::default()
                },
                UpdateOptions {
                    expected_updated_at: created.updated_at,
                    actor: "test".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Blocked);
        assert_eq!(updated.version, 2);
        assert!(updated.updated_at > created.updated_at);

        // The stale token no longer opens the door
        let err = store
            .update_task(
                &id,
                TaskPatch::default(),
                UpdateOptions {
                    expected_updated_at: created.updated_at,
                    actor: "test".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_patch_clear_vs_keep() {
        let store = MemoryStore::new();
        let mut t = task("el-aaa");
        t.assignee = Some(crate::model::AgentId::parse("ag-w1x").unwrap());
        t.status = TaskStatus::InProgress;
        let created = store.create_task(t).await.unwrap();

        // Keep leaves the assignee alone
        let kept = store
            .update_task(
                &created.id,
                TaskPatch {
                    priority: Some(1),
                    ..Default::default()
                },
                UpdateOptions {
                    expected_updated_at: created.updated_at,
                    actor: "test".into(),
                },
            )
            .await
            .unwrap();
        assert!(kept.assignee.is_some());

        // Clear removes it
        let cleared = store
            .update_task(
                &created.id,
                TaskPatch {
                    status: Some(TaskStatus::Open),
                    assignee: Patch::Clear,
                    ..Default::default()
                },
                UpdateOptions {
                    expected_updated_at: kept.updated_at,
                    actor: "test".into(),
                },
            )
            .await
            .unwrap();
        assert!(cleared.assignee.is_none());
    }

    #[tokio::test]
    async fn test_metadata_replacement() {
        let store = MemoryStore::new();
        let created = store.create_task(task("el-aaa")).await.unwrap();

        let mut meta = TaskMetadata::default();
        meta.orchestrator.get_or_insert_with(Default::default).branch =
            Some("agent/w1/el-aaa-demo".into());
        let updated = store
            .update_task(
                &created.id,
                TaskPatch {
                    metadata: Some(meta),
                    ..Default::default()
                },
                UpdateOptions {
                    expected_updated_at: created.updated_at,
                    actor: "test".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.orchestrator().unwrap().branch.as_deref(),
            Some("agent/w1/el-aaa-demo")
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = MemoryStore::new();
        for (raw, status, tags) in [
            ("el-aaa", TaskStatus::Open, vec!["fix"]),
            ("el-bbb", TaskStatus::Open, vec!["fix", "auto-created"]),
            ("el-ccc", TaskStatus::Review, vec![]),
        ] {
            let mut t = task(raw);
            t.status = status;
            t.tags = tags.into_iter().map(String::from).collect();
            store.create_task(t).await.unwrap();
        }

        let open = store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Open),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(open.len(), 2);

        // Tag containment requires every listed tag
        let tagged = store
            .list_tasks(&TaskFilter {
                tags: vec!["fix".into(), "auto-created".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id.as_str(), "el-bbb");

        let paged = store
            .list_tasks(&TaskFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_element() {
        let store = MemoryStore::new();
        let created = store.create_task(task("el-aaa")).await.unwrap();
        store
            .delete_task(
                &created.id,
                DeleteOptions {
                    actor: "test".into(),
                    reason: "cleanup".into(),
                },
            )
            .await
            .unwrap();
        assert!(store.get_task(&created.id).await.unwrap().is_none());
        assert_eq!(store.task_count().await, 0);
    }

    #[tokio::test]
    async fn test_collision_check_sees_tasks() {
        let store = MemoryStore::new();
        store.create_task(task("el-aaa")).await.unwrap();
        assert!(store.exists("el-aaa").await);
        assert!(!store.exists("el-zzz").await);
    }
}
