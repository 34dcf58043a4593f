//! Steward daemon — long-running host for the orchestration stewards
//!
//! Wires the element catalog, agent registry, worktree manager, and event
//! bus together, arms the health steward timer, and scans the merge
//! pipeline on a fixed cadence until interrupted.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn};

use config::DaemonConfig;
use orchestration::session::{ActiveSession, MessageOutcome, SessionControl, StopOptions};
use orchestration::{
    AgentId, EventBus, GitWorktrees, HealthSteward, InMemoryRegistry, LoggingDispatch,
    MemoryStore, MergeSteward, OrchestratorEvent, OrchestratorResult, SessionId, TaskAssignment,
};

#[derive(Parser, Debug)]
#[command(
    name = "steward-daemon",
    about = "Health and merge stewardship for the autonomous dev forge"
)]
struct Args {
    /// Repository the stewards operate on (default: current directory)
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Merge batch scan cadence in milliseconds
    #[arg(long)]
    merge_scan_interval_ms: Option<u64>,

    /// Test command run inside task worktrees
    #[arg(long)]
    test_command: Option<String>,

    /// Merge destination branch (repository default branch when omitted)
    #[arg(long)]
    target_branch: Option<String>,

    /// Report pending work without driving the merge pipeline
    #[arg(long)]
    dry_run: bool,
}

/// Placeholder session control until a session-manager transport is wired
/// in: nothing is running, messages go nowhere.
struct NoSessions;

#[async_trait]
impl SessionControl for NoSessions {
    async fn active_session(&self, _agent: &AgentId) -> OrchestratorResult<Option<ActiveSession>> {
        Ok(None)
    }

    async fn message_session(
        &self,
        session: &SessionId,
        _content: &str,
    ) -> OrchestratorResult<MessageOutcome> {
        warn!(session = %session, "no session transport configured, message dropped");
        Ok(MessageOutcome { success: false })
    }

    async fn stop_session(&self, session: &SessionId, _opts: StopOptions) -> OrchestratorResult<()> {
        warn!(session = %session, "no session transport configured, stop ignored");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = DaemonConfig::default();
    if let Some(root) = args.repo_root {
        config.repo_root = root;
    }
    if let Some(interval) = args.merge_scan_interval_ms {
        config.merge_scan_interval_ms = interval;
    }
    if let Some(command) = args.test_command {
        config.merge.test_command = command;
    }
    if let Some(target) = args.target_branch {
        config.merge.target_branch = Some(target);
    }

    info!(
        repo = %config.repo_root.display(),
        merge_interval_ms = config.merge_scan_interval_ms,
        health_interval_ms = config.health.health_check_interval_ms,
        test_command = %config.merge.test_command,
        dry_run = args.dry_run,
        "steward daemon starting"
    );

    // --- Wire the services ---
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let events = EventBus::new().shared();
    let dispatch = Arc::new(LoggingDispatch);
    let assignment = Arc::new(TaskAssignment::new(store.clone(), registry.clone()));
    let worktrees = Arc::new(GitWorktrees::new(&config.repo_root).await?);

    let health = Arc::new(HealthSteward::new(
        config.health.clone(),
        registry.clone(),
        Arc::new(NoSessions),
        assignment.clone(),
        dispatch.clone(),
        events.clone(),
    ));
    let merge = MergeSteward::new(
        config.merge.clone(),
        store.clone(),
        assignment.clone(),
        worktrees,
        dispatch,
    )?;

    // --- Surface steward events in the log ---
    let mut bus_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            match event {
                OrchestratorEvent::IssueDetected { issue } => {
                    warn!(
                        agent = %issue.agent_id,
                        issue = %issue.issue_type,
                        severity = %issue.severity,
                        "health issue detected"
                    );
                }
                OrchestratorEvent::IssueResolved { issue } => {
                    info!(agent = %issue.agent_id, issue = %issue.issue_type, "health issue resolved");
                }
                OrchestratorEvent::ActionTaken { action } => {
                    info!(
                        agent = %action.agent_id,
                        action = %action.action,
                        succeeded = action.succeeded,
                        "health action"
                    );
                }
                OrchestratorEvent::CheckCompleted { report } => {
                    info!(
                        agents = report.agents_checked,
                        with_issues = report.agents_with_issues,
                        duration_ms = report.duration_ms,
                        "health scan completed"
                    );
                }
            }
        }
    });

    health.start();

    // --- Merge pipeline loop ---
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(
        config.merge_scan_interval_ms,
    ));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if args.dry_run {
                    match assignment.tasks_awaiting_merge().await {
                        Ok(pending) => info!(pending = pending.len(), "dry run: tasks awaiting merge"),
                        Err(e) => error!("dry run query failed: {e}"),
                    }
                    continue;
                }
                match merge.process_pending().await {
                    Ok(report) if report.total_processed > 0 => {
                        info!(
                            total = report.total_processed,
                            merged = report.merged_count,
                            errors = report.error_count,
                            "merge batch finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("merge batch failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    health.stop();
    info!("steward daemon stopped");
    Ok(())
}
