//! Orchestration backplane for the autonomous dev forge
//!
//! This library turns a task queue into finished, merged work:
//! - Task assignment binds tasks to agents with branch/worktree context and
//!   drives the per-task lifecycle (assign, start, complete, handoff).
//! - The health steward periodically scans running agent sessions, detects
//!   problem conditions, and takes corrective action (ping, restart,
//!   reassign, escalate).
//! - The merge steward picks up reviewed tasks, runs their tests inside the
//!   task worktree, merges clean passes into the trunk, and opens fix tasks
//!   for failures.
//! - The identifier scheme names every entity with short, collision-checked,
//!   optionally hierarchical ids.
//!
//! The element catalog, agent registry, session manager, worktree manager,
//! and dispatch channel are external collaborators; the narrow traits here
//! are the only surface the core speaks.

pub mod assignment;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod health;
pub mod id;
pub mod merge;
pub mod model;
pub mod registry;
pub mod session;
pub mod store;
pub mod worktree;

// Re-export the service types
pub use assignment::{
    slug, AgentWorkload, AssignOptions, AssignmentFilter, HandoffOptions, TaskAssignment,
};
pub use health::{
    HealthAction, HealthConfig, HealthIssue, HealthMetricsSnapshot, HealthSteward, IssueSeverity,
    IssueType, ScanReport,
};
pub use merge::{BatchReport, MergeConfig, MergeSteward, MergeStrategy, TaskProcessOutcome};

// Re-export the data model
pub use error::{OrchestratorError, OrchestratorResult};
pub use id::{ElementId, GenerateOptions, IdGenerator, ParsedId};
pub use model::{
    Agent, AgentId, AgentRole, AgentSessionStatus, AssignmentStatus, FixType, MergeStatus,
    OrchestratorMeta, SessionId, Task, TaskId, TaskStatus, TaskType,
};

// Re-export the collaborator seams
pub use dispatch::{Dispatch, DispatchKind, LoggingDispatch};
pub use events::{EventBus, OrchestratorEvent, SharedEventBus};
pub use registry::{AgentRegistry, InMemoryRegistry};
pub use session::{ActiveSession, SessionControl, StopOptions};
pub use store::{ElementStore, MemoryStore, StoreError, TaskFilter, TaskPatch, UpdateOptions};
pub use worktree::{GitWorktrees, WorktreeManager};
