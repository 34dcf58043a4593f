//! Follow-up task creation for failed merges
//!
//! One open fix task per (original task, failure class): repeat failures
//! land on the existing task instead of piling up duplicates.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatch::{Dispatch, DispatchKind};
use crate::error::OrchestratorResult;
use crate::id::{CollisionCheck, GenerateOptions, IdGenerator};
use crate::model::{FixType, Task, TaskId, TaskStatus, TaskType};
use crate::store::{map_store_error, ElementStore, TaskFilter};

/// Collision probe over the element catalog
pub(crate) struct StoreCollision<'a>(pub &'a dyn ElementStore);

#[async_trait]
impl CollisionCheck for StoreCollision<'_> {
    async fn exists(&self, id: &str) -> bool {
        match TaskId::parse(id) {
            Ok(task_id) => matches!(self.0.get_task(&task_id).await, Ok(Some(_))),
            Err(_) => false,
        }
    }
}

fn title_for(fix_type: FixType, original: &Task) -> String {
    match fix_type {
        FixType::TestFailure => format!("Fix failing tests: {}", original.title),
        FixType::MergeConflict => format!("Resolve merge conflict: {}", original.title),
        FixType::General => format!("Fix merge failure: {}", original.title),
    }
}

fn body_for(
    fix_type: FixType,
    original: &Task,
    failure_detail: &str,
    affected_files: &[String],
) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "Automatic follow-up for task {} ({}).\n\n",
        original.id, fix_type
    ));
    if let Some(branch) = original.orchestrator().and_then(|o| o.branch.as_deref()) {
        body.push_str(&format!("Branch: {branch}\n"));
    }
    body.push_str(&format!("\nFailure:\n{failure_detail}\n"));
    if !affected_files.is_empty() {
        body.push_str("\nAffected files:\n");
        for file in affected_files {
            body.push_str(&format!("- {file}\n"));
        }
    }
    body
}

/// Find the open fix task for (original, fix_type), or create one.
/// The original task's owning agent is notified when one exists.
pub(crate) async fn ensure_fix_task(
    store: &dyn ElementStore,
    idgen: &IdGenerator,
    dispatch: &dyn Dispatch,
    original: &Task,
    fix_type: FixType,
    failure_detail: &str,
    affected_files: &[String],
) -> OrchestratorResult<TaskId> {
    // Dedupe against open fix tasks pointing back at this one
    let open_fixes = store
        .list_tasks(&TaskFilter {
            status: Some(TaskStatus::Open),
            tags: vec!["fix".to_string()],
            ..Default::default()
        })
        .await
        .map_err(|e| map_store_error(e, "list"))?;
    if let Some(existing) = open_fixes.iter().find(|t| {
        t.metadata.original_task_id.as_ref() == Some(&original.id)
            && t.metadata.fix_type == Some(fix_type)
    }) {
        info!(
            original = %original.id,
            fix_task = %existing.id,
            %fix_type,
            "reusing open fix task"
        );
        return Ok(existing.id.clone());
    }

    let title = title_for(fix_type, original);
    let collision = StoreCollision(store);
    let id = idgen
        .generate(
            &title,
            "merge-steward",
            GenerateOptions {
                collision_check: Some(&collision),
                ..Default::default()
            },
        )
        .await?;

    let mut fix_task = Task::new(TaskId::from(id), &title);
    fix_task.body = Some(body_for(fix_type, original, failure_detail, affected_files));
    fix_task.task_type = TaskType::Bug;
    fix_task.priority = original.priority;
    fix_task.tags = vec![
        "fix".to_string(),
        fix_type.to_string(),
        "auto-created".to_string(),
    ];
    fix_task.metadata.original_task_id = Some(original.id.clone());
    fix_task.metadata.fix_type = Some(fix_type);

    let created = store
        .create_task(fix_task)
        .await
        .map_err(|e| map_store_error(e, "create"))?;
    info!(
        original = %original.id,
        fix_task = %created.id,
        %fix_type,
        "fix task created"
    );

    // Best effort: tell whoever owned the original
    if let Some(owner) = original
        .orchestrator()
        .and_then(|o| o.assigned_agent.clone())
    {
        let content = format!(
            "merge pipeline opened {} for your task {}: {}",
            created.id, original.id, title
        );
        let metadata = serde_json::json!({
            "fix_task_id": created.id,
            "original_task_id": original.id,
            "fix_type": fix_type,
        });
        if let Err(e) = dispatch
            .notify_agent(&owner, DispatchKind::TaskAssignment, &content, metadata)
            .await
        {
            warn!(agent = %owner, error = %e, "fix-task notification failed");
        }
    }

    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LoggingDispatch;
    use crate::store::MemoryStore;

    fn original() -> Task {
        let mut task = Task::new(TaskId::parse("el-orig1").unwrap(), "Ship the widget");
        task.priority = 2;
        task.orchestrator_mut().branch = Some("agent/wk1/el-orig1-ship".to_string());
        task
    }

    #[tokio::test]
    async fn test_creates_fix_task_with_linkage() {
        let store = MemoryStore::new();
        let idgen = IdGenerator::new("el").unwrap();
        let original = store.create_task(original()).await.unwrap();

        let fix_id = ensure_fix_task(
            &store,
            &idgen,
            &LoggingDispatch,
            &original,
            FixType::TestFailure,
            "2 of 14 tests failed",
            &["src/widget.rs".to_string()],
        )
        .await
        .unwrap();

        let fix = store.get_task(&fix_id).await.unwrap().unwrap();
        assert_eq!(fix.status, TaskStatus::Open);
        assert_eq!(fix.task_type, TaskType::Bug);
        assert_eq!(fix.priority, 2);
        assert_eq!(fix.metadata.original_task_id, Some(original.id.clone()));
        assert_eq!(fix.metadata.fix_type, Some(FixType::TestFailure));
        assert!(fix.has_tag("fix"));
        assert!(fix.has_tag("test_failure"));
        assert!(fix.has_tag("auto-created"));
        let body = fix.body.unwrap();
        assert!(body.contains("2 of 14 tests failed"));
        assert!(body.contains("src/widget.rs"));
        assert!(body.contains("agent/wk1/el-orig1-ship"));
    }

    #[tokio::test]
    async fn test_dedupes_per_fix_type() {
        let store = MemoryStore::new();
        let idgen = IdGenerator::new("el").unwrap();
        let original = store.create_task(original()).await.unwrap();

        let first = ensure_fix_task(
            &store,
            &idgen,
            &LoggingDispatch,
            &original,
            FixType::MergeConflict,
            "conflict in src/lib.rs",
            &[],
        )
        .await
        .unwrap();
        let second = ensure_fix_task(
            &store,
            &idgen,
            &LoggingDispatch,
            &original,
            FixType::MergeConflict,
            "conflict in src/lib.rs again",
            &[],
        )
        .await
        .unwrap();
        assert_eq!(first, second);

        // A different failure class gets its own task
        let other = ensure_fix_task(
            &store,
            &idgen,
            &LoggingDispatch,
            &original,
            FixType::General,
            "push rejected",
            &[],
        )
        .await
        .unwrap();
        assert_ne!(first, other);
        assert_eq!(store.task_count().await, 3);
    }

    #[tokio::test]
    async fn test_collision_probe() {
        let store = MemoryStore::new();
        store.create_task(original()).await.unwrap();
        let probe = StoreCollision(&store);
        assert!(probe.exists("el-orig1").await);
        assert!(!probe.exists("el-nope").await);
        assert!(!probe.exists("not an id").await);
    }
}
