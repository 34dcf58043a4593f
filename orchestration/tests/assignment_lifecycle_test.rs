//! Assignment lifecycle invariants
//!
//! Walks tasks through assign → start → complete → handoff with a live
//! in-memory catalog and checks the cross-field invariants the rest of the
//! system leans on.

use std::sync::Arc;

use orchestration::{
    Agent, AgentId, AgentRole, AssignOptions, AssignmentStatus, HandoffOptions, MemoryStore,
    MergeStatus, Task, TaskAssignment, TaskId, TaskStatus,
};
use orchestration::registry::InMemoryRegistry;
use orchestration::store::ElementStore;

struct Fixture {
    store: Arc<MemoryStore>,
    assignment: TaskAssignment,
    worker: AgentId,
}

async fn fixture(max_concurrent: u32) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let worker = AgentId::parse("ag-wk1").unwrap();
    registry
        .put(
            Agent::new(worker.clone(), "wk1", AgentRole::Worker)
                .with_max_concurrent_tasks(max_concurrent),
        )
        .await;
    Fixture {
        assignment: TaskAssignment::new(store.clone(), registry),
        store,
        worker,
    }
}

async fn seed(store: &MemoryStore, raw: &str, title: &str) -> TaskId {
    let id = TaskId::parse(raw).unwrap();
    store
        .create_task(Task::new(id.clone(), title))
        .await
        .unwrap();
    id
}

/// An in_progress task always carries an assignee matching the orchestrator
/// record; completing clears the assignee and surfaces the task for merge
#[tokio::test]
async fn test_assign_start_complete_invariants() {
    let fx = fixture(2).await;
    let id = seed(&fx.store, "el-t1a", "Ship the feature").await;

    let task = fx
        .assignment
        .assign_to_agent(
            &id,
            &fx.worker,
            AssignOptions {
                mark_as_started: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assignee, Some(fx.worker.clone()));
    assert_eq!(
        task.orchestrator().unwrap().assigned_agent,
        Some(fx.worker.clone())
    );
    assert_eq!(task.assignment_status(), AssignmentStatus::InProgress);
    assert!(task.validate().is_ok());

    let task = fx.assignment.complete_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Review);
    assert!(task.assignee.is_none());
    assert_eq!(task.merge_status(), Some(MergeStatus::Pending));
    assert_eq!(task.assignment_status(), AssignmentStatus::Completed);

    let awaiting = fx.assignment.tasks_awaiting_merge().await.unwrap();
    assert_eq!(awaiting.len(), 1);
    assert_eq!(awaiting[0].id, id);
}

/// The concurrency cap bounds in-progress work per agent
#[tokio::test]
async fn test_concurrency_cap_is_never_exceeded() {
    let fx = fixture(2).await;
    let mut started = 0;
    for raw in ["el-aaa", "el-bbb", "el-ccc", "el-ddd"] {
        let id = seed(&fx.store, raw, "work item").await;
        let result = fx
            .assignment
            .assign_to_agent(
                &id,
                &fx.worker,
                AssignOptions {
                    mark_as_started: true,
                    ..Default::default()
                },
            )
            .await;
        if result.is_ok() {
            started += 1;
        } else {
            assert_eq!(result.unwrap_err().kind(), "constraint");
        }
    }
    assert_eq!(started, 2);

    let workload = fx.assignment.get_agent_workload(&fx.worker).await.unwrap();
    assert_eq!(workload.in_progress, 2);
    assert!(!fx.assignment.agent_has_capacity(&fx.worker).await.unwrap());

    // Completing one frees a slot
    let done = TaskId::parse("el-aaa").unwrap();
    fx.assignment.complete_task(&done).await.unwrap();
    assert!(fx.assignment.agent_has_capacity(&fx.worker).await.unwrap());
}

/// A task in review with a live merge marker disappears from the merge
/// pipeline on handoff and records the handoff
#[tokio::test]
async fn test_handoff_resets_merge_visibility() {
    let fx = fixture(2).await;
    let id = seed(&fx.store, "el-t1a", "Ship the feature").await;
    fx.assignment
        .assign_to_agent(
            &id,
            &fx.worker,
            AssignOptions {
                mark_as_started: true,
                session_id: Some("s1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    fx.assignment.complete_task(&id).await.unwrap();

    let task = fx
        .assignment
        .handoff_task(
            &id,
            HandoffOptions {
                session_id: Some("s1".into()),
                message: "fix review feedback".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Open);
    assert!(task.assignee.is_none());
    let orch = task.orchestrator().unwrap();
    assert_eq!(orch.merge_status, None);
    assert_eq!(orch.handoff_history.len(), 1);
    assert_eq!(orch.handoff_history[0].message, "fix review feedback");
    assert_eq!(orch.handoff_history[0].session_id.as_deref(), Some("s1"));
    assert_eq!(orch.last_session_id.as_deref(), Some("s1"));
    assert!(orch.handoff_branch.is_some());

    assert!(fx.assignment.tasks_awaiting_merge().await.unwrap().is_empty());
}

/// Handoff history grows by exactly one entry per handoff
#[tokio::test]
async fn test_handoff_history_is_monotonic() {
    let fx = fixture(3).await;
    let id = seed(&fx.store, "el-t1a", "Bounce repeatedly").await;

    for round in 1..=3u32 {
        fx.assignment
            .assign_to_agent(&id, &fx.worker, AssignOptions::default())
            .await
            .unwrap();
        let task = fx
            .assignment
            .handoff_task(
                &id,
                HandoffOptions {
                    session_id: None,
                    message: format!("round {round}"),
                },
            )
            .await
            .unwrap();
        let history = &task.orchestrator().unwrap().handoff_history;
        assert_eq!(history.len(), round as usize);
        assert_eq!(history.last().unwrap().message, format!("round {round}"));
    }
}

/// Re-assignment after unassign reuses the preserved branch context
#[tokio::test]
async fn test_unassign_then_reassign() {
    let fx = fixture(2).await;
    let id = seed(&fx.store, "el-t1a", "Ship the feature").await;

    let task = fx
        .assignment
        .assign_to_agent(&id, &fx.worker, AssignOptions::default())
        .await
        .unwrap();
    let original_branch = task.orchestrator().unwrap().branch.clone().unwrap();

    fx.assignment.unassign_task(&id).await.unwrap();
    let task = fx
        .assignment
        .assign_to_agent(
            &id,
            &fx.worker,
            AssignOptions {
                branch: Some(original_branch.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        task.orchestrator().unwrap().branch.as_deref(),
        Some(original_branch.as_str())
    );
    assert_eq!(task.assignment_status(), AssignmentStatus::Assigned);
}
