//! Core entity types shepherded by the orchestration backplane
//!
//! Tasks and agents live in the element catalog; the core only ever mutates
//! them through the store's version-gated update. The orchestrator metadata
//! sub-record is schema-owned here, but unknown keys written by other
//! subsystems survive a round-trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::id::ElementId;

/// Opaque session identifier issued by the session manager
pub type SessionId = String;

/// Identifier of a task element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(ElementId);

impl TaskId {
    pub fn parse(raw: &str) -> OrchestratorResult<Self> {
        ElementId::parse(raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn element(&self) -> &ElementId {
        &self.0
    }
}

impl From<ElementId> for TaskId {
    fn from(id: ElementId) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of an agent entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(ElementId);

impl AgentId {
    pub fn parse(raw: &str) -> OrchestratorResult<Self> {
        ElementId::parse(raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn element(&self) -> &ElementId {
        &self.0
    }
}

impl From<ElementId> for AgentId {
    fn from(id: ElementId) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Review,
    Closed,
    Deferred,
    Cancelled,
    Blocked,
    Backlog,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Closed => "closed",
            Self::Deferred => "deferred",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
            Self::Backlog => "backlog",
        };
        f.write_str(s)
    }
}

/// Kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Bug,
    Feature,
    Task,
    Chore,
}

/// Persisted marker gating the merge pipeline's view of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Testing,
    Merging,
    Merged,
    Conflict,
    TestFailed,
    Failed,
    NotApplicable,
}

impl MergeStatus {
    /// Whether the pipeline is done with this task
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Merged | Self::NotApplicable)
    }
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Testing => "testing",
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::Conflict => "conflict",
            Self::TestFailed => "test_failed",
            Self::Failed => "failed",
            Self::NotApplicable => "not_applicable",
        };
        f.write_str(s)
    }
}

/// Derived classification of a task's assignment state; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Unassigned,
    Assigned,
    InProgress,
    Completed,
    Merged,
}

/// Pass/fail totals from one test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTotals {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

/// Outcome of the most recent test run for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub totals: TestTotals,
}

/// One handoff of a task back to the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffEntry {
    pub session_id: Option<SessionId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Orchestrator-owned sub-record under a task's metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    /// Absent means the task is not visible to the merge steward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_status: Option<MergeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub test_run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_result: Option<TestResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handoff_history: Vec<HandoffEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_at: Option<DateTime<Utc>>,
    /// Keys written by other subsystems; preserved on round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Follow-up classification stamped onto auto-created fix tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    TestFailure,
    MergeConflict,
    General,
}

impl std::fmt::Display for FixType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TestFailure => "test_failure",
            Self::MergeConflict => "merge_conflict",
            Self::General => "general",
        };
        f.write_str(s)
    }
}

/// Metadata bag on a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<OrchestratorMeta>,
    /// Fix tasks point back at the task whose merge failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_type: Option<FixType>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A unit of work assignable to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub status: TaskStatus,
    pub priority: u8,
    pub complexity: u8,
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    /// Create an open task with middle-of-the-road priority and complexity.
    /// Timestamps and version are assigned by the store on create.
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id,
            title: title.into(),
            body: None,
            status: TaskStatus::Open,
            priority: 3,
            complexity: 3,
            task_type: TaskType::Task,
            assignee: None,
            tags: Vec::new(),
            created_at: epoch,
            updated_at: epoch,
            closed_at: None,
            version: 0,
            metadata: TaskMetadata::default(),
        }
    }

    /// Check declared bounds and cross-field invariants
    pub fn validate(&self) -> OrchestratorResult<()> {
        if !(1..=5).contains(&self.priority) {
            return Err(OrchestratorError::validation(format!(
                "priority must be 1..=5, got {}",
                self.priority
            )));
        }
        if !(1..=5).contains(&self.complexity) {
            return Err(OrchestratorError::validation(format!(
                "complexity must be 1..=5, got {}",
                self.complexity
            )));
        }
        if self.title.trim().is_empty() {
            return Err(OrchestratorError::validation("title must not be empty"));
        }
        if self.status == TaskStatus::InProgress && self.assignee.is_none() {
            return Err(OrchestratorError::validation(
                "in_progress task must have an assignee",
            ));
        }
        if self.status == TaskStatus::Closed && self.assignee.is_some() {
            return Err(OrchestratorError::validation(
                "closed task must not have an assignee",
            ));
        }
        if self.status == TaskStatus::Closed && self.closed_at.is_none() {
            return Err(OrchestratorError::validation(
                "closed task must have a closed_at timestamp",
            ));
        }
        Ok(())
    }

    /// Orchestrator sub-record, if present
    pub fn orchestrator(&self) -> Option<&OrchestratorMeta> {
        self.metadata.orchestrator.as_ref()
    }

    /// Orchestrator sub-record, created empty on first access
    pub fn orchestrator_mut(&mut self) -> &mut OrchestratorMeta {
        self.metadata.orchestrator.get_or_insert_with(Default::default)
    }

    /// Merge-pipeline marker, if the task is visible to the merge steward
    pub fn merge_status(&self) -> Option<MergeStatus> {
        self.orchestrator().and_then(|o| o.merge_status)
    }

    /// Derived assignment classification
    ///
    /// closed ⇒ merged; review ⇒ completed; assigned ∧ in_progress ⇒
    /// in_progress; assigned ⇒ assigned; otherwise unassigned.
    pub fn assignment_status(&self) -> AssignmentStatus {
        match self.status {
            TaskStatus::Closed => AssignmentStatus::Merged,
            TaskStatus::Review => AssignmentStatus::Completed,
            TaskStatus::InProgress if self.assignee.is_some() => AssignmentStatus::InProgress,
            _ if self.assignee.is_some() => AssignmentStatus::Assigned,
            _ => AssignmentStatus::Unassigned,
        }
    }

    /// Whether this task carries a given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Lifecycle role of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Director,
    Worker,
    Steward,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Director => "director",
            Self::Worker => "worker",
            Self::Steward => "steward",
        };
        f.write_str(s)
    }
}

/// Session lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSessionStatus {
    Idle,
    Starting,
    Running,
    Suspended,
    Terminating,
    Terminated,
}

impl AgentSessionStatus {
    /// Whether the agent is actively working and subject to health checks
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// An autonomous worker identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub session_status: AgentSessionStatus,
    pub max_concurrent_tasks: u32,
}

impl Agent {
    pub fn new(id: AgentId, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            session_status: AgentSessionStatus::Idle,
            max_concurrent_tasks: 1,
        }
    }

    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_session_status(mut self, status: AgentSessionStatus) -> Self {
        self.session_status = status;
        self
    }
}
