//! Health steward — periodic liveness and quality monitoring of agents
//!
//! A timer drives scans over every running agent: detect problem conditions,
//! dedup them into active issues, re-check old issues, and take corrective
//! action. All steward state is in-memory and rebuilt after a restart from
//! the registry and session manager alone. Errors never escape the timer
//! loop; a failing check is logged and counted.

mod actions;
pub mod issue;
mod tracker;

pub use actions::{decide_action, ActionRecord, HealthAction};
pub use issue::{HealthIssue, IssueKey, IssueSeverity, IssueType};
pub use tracker::AgentTracker;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assignment::TaskAssignment;
use crate::dispatch::{Dispatch, DispatchKind};
use crate::events::{OrchestratorEvent, SharedEventBus};
use crate::model::{Agent, AgentId, SessionId, TaskId};
use crate::registry::AgentRegistry;
use crate::session::{SessionControl, StopOptions};

/// Steward configuration; unknown options are rejected on deserialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Silence longer than this is a `no_output` issue
    pub no_output_threshold_ms: u64,
    /// Errors in the rolling window at or above this count are `repeated_errors`
    pub error_count_threshold: usize,
    /// Rolling window for error and output counting
    pub error_window_ms: u64,
    /// Session inactivity older than this is `session_stale`
    pub stale_session_threshold_ms: u64,
    /// Periodic scan cadence
    pub health_check_interval_ms: u64,
    /// Pings sent before escalating to restart or director
    pub max_ping_attempts: u32,
    pub auto_restart: bool,
    pub auto_reassign: bool,
    pub notify_director: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            no_output_threshold_ms: 5 * 60 * 1000,
            error_count_threshold: 5,
            error_window_ms: 10 * 60 * 1000,
            stale_session_threshold_ms: 15 * 60 * 1000,
            health_check_interval_ms: 60 * 1000,
            max_ping_attempts: 3,
            auto_restart: true,
            auto_reassign: true,
            notify_director: true,
        }
    }
}

/// Result of one scan, emitted as a `check:completed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub timestamp: DateTime<Utc>,
    pub agents_checked: usize,
    pub agents_with_issues: usize,
    pub new_issues: Vec<HealthIssue>,
    pub resolved_issues: Vec<HealthIssue>,
    pub actions_taken: Vec<ActionRecord>,
    pub duration_ms: u64,
}

/// Monotonic counters over the steward's lifetime
#[derive(Debug, Default)]
struct HealthMetrics {
    scans: AtomicU64,
    issues_detected: AtomicU64,
    issues_resolved: AtomicU64,
    actions_taken: AtomicU64,
    check_errors: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMetricsSnapshot {
    pub scans: u64,
    pub issues_detected: u64,
    pub issues_resolved: u64,
    pub actions_taken: u64,
    pub check_errors: u64,
}

/// A condition observed on one agent during a scan
struct Detection {
    agent: Agent,
    issue_type: IssueType,
    severity: IssueSeverity,
    context: String,
    session_id: Option<SessionId>,
}

#[derive(Default)]
struct StewardState {
    trackers: HashMap<AgentId, AgentTracker>,
    active_issues: HashMap<IssueKey, HealthIssue>,
    /// Issues whose director alert already went out
    notified: HashSet<IssueKey>,
}

/// The health steward service
pub struct HealthSteward {
    config: HealthConfig,
    registry: Arc<dyn AgentRegistry>,
    sessions: Arc<dyn SessionControl>,
    assignment: Arc<TaskAssignment>,
    dispatch: Arc<dyn Dispatch>,
    events: SharedEventBus,
    state: Mutex<StewardState>,
    scan_in_flight: AtomicBool,
    metrics: HealthMetrics,
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthSteward {
    pub fn new(
        config: HealthConfig,
        registry: Arc<dyn AgentRegistry>,
        sessions: Arc<dyn SessionControl>,
        assignment: Arc<TaskAssignment>,
        dispatch: Arc<dyn Dispatch>,
        events: SharedEventBus,
    ) -> Self {
        Self {
            config,
            registry,
            sessions,
            assignment,
            dispatch,
            events,
            state: Mutex::new(StewardState::default()),
            scan_in_flight: AtomicBool::new(false),
            metrics: HealthMetrics::default(),
            timer: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Arm the periodic scan timer
    pub fn start(self: &Arc<Self>) {
        let steward = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                steward.config.health_check_interval_ms,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if steward.run_scan().await.is_none() {
                    debug!("scan still in flight, tick skipped");
                }
            }
        });
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
        info!(
            interval_ms = self.config.health_check_interval_ms,
            "health steward started"
        );
    }

    /// Disarm the timer; in-flight scans finish on their own
    pub fn stop(&self) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                info!("health steward stopped");
            }
        }
    }

    /// Session plumbing reports output from an agent
    pub async fn record_output(&self, agent: &AgentId) {
        self.record_output_at(agent, Utc::now()).await;
    }

    /// Output with an explicit timestamp, for replaying session logs
    pub async fn record_output_at(&self, agent: &AgentId, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state
            .trackers
            .entry(agent.clone())
            .or_default()
            .record_output(at);
    }

    /// Session plumbing reports an error from an agent
    pub async fn record_error(&self, agent: &AgentId) {
        self.record_error_at(agent, Utc::now()).await;
    }

    pub async fn record_error_at(&self, agent: &AgentId, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state
            .trackers
            .entry(agent.clone())
            .or_default()
            .record_error(at);
    }

    /// Report a process crash. The issue is registered synchronously so the
    /// next scan acts on it even if the crash window is short.
    pub async fn record_crash(
        &self,
        agent: &AgentId,
        task_id: Option<TaskId>,
        session_id: Option<SessionId>,
    ) {
        let role = match self.registry.get(agent).await {
            Ok(Some(a)) => a.role,
            _ => {
                warn!(agent = %agent, "crash reported for unknown agent");
                crate::model::AgentRole::Worker
            }
        };

        let mut state = self.state.lock().await;
        state.trackers.entry(agent.clone()).or_default().crashed = true;

        let key = (agent.clone(), IssueType::ProcessCrashed);
        if let Some(existing) = state.active_issues.get_mut(&key) {
            existing.touch(IssueSeverity::Critical, "process crashed again");
            return;
        }

        let mut new_issue = HealthIssue::new(
            agent.clone(),
            role,
            IssueType::ProcessCrashed,
            IssueSeverity::Critical,
            "agent process crashed",
        );
        if let Some(task_id) = task_id {
            new_issue = new_issue.with_task(task_id);
        }
        if let Some(session_id) = session_id {
            new_issue = new_issue.with_session(session_id);
        }
        state.active_issues.insert(key, new_issue.clone());
        self.metrics.issues_detected.fetch_add(1, Ordering::Relaxed);
        self.events
            .publish(OrchestratorEvent::IssueDetected { issue: new_issue });
    }

    /// Snapshot of currently active issues
    pub async fn active_issues(&self) -> Vec<HealthIssue> {
        let state = self.state.lock().await;
        let mut issues: Vec<HealthIssue> = state.active_issues.values().cloned().collect();
        issues.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        issues
    }

    pub fn metrics(&self) -> HealthMetricsSnapshot {
        HealthMetricsSnapshot {
            scans: self.metrics.scans.load(Ordering::Relaxed),
            issues_detected: self.metrics.issues_detected.load(Ordering::Relaxed),
            issues_resolved: self.metrics.issues_resolved.load(Ordering::Relaxed),
            actions_taken: self.metrics.actions_taken.load(Ordering::Relaxed),
            check_errors: self.metrics.check_errors.load(Ordering::Relaxed),
        }
    }

    /// Run one scan now. Returns `None` when another scan is already in
    /// flight (the tick-skip policy).
    pub async fn run_scan(&self) -> Option<ScanReport> {
        if self.scan_in_flight.swap(true, Ordering::SeqCst) {
            return None;
        }
        let report = self.scan_inner().await;
        self.scan_in_flight.store(false, Ordering::SeqCst);
        self.metrics.scans.fetch_add(1, Ordering::Relaxed);
        self.events.publish(OrchestratorEvent::CheckCompleted {
            report: report.clone(),
        });
        Some(report)
    }

    async fn scan_inner(&self) -> ScanReport {
        let started = Instant::now();
        let now = Utc::now();
        let mut new_issues: Vec<HealthIssue> = Vec::new();
        let mut resolved_issues: Vec<HealthIssue> = Vec::new();
        let mut actions_taken: Vec<ActionRecord> = Vec::new();

        let agents = match self
            .registry
            .list_by_session_status(crate::model::AgentSessionStatus::Running)
            .await
        {
            Ok(agents) => agents,
            Err(e) => {
                // A registry hiccup must not dissolve the active issue map
                warn!(error = %e, "agent enumeration failed, skipping scan");
                self.metrics.check_errors.fetch_add(1, Ordering::Relaxed);
                let state = self.state.lock().await;
                let agents_with_issues = state
                    .active_issues
                    .keys()
                    .map(|(agent, _)| agent.clone())
                    .collect::<HashSet<_>>()
                    .len();
                return ScanReport {
                    timestamp: now,
                    agents_checked: 0,
                    agents_with_issues,
                    new_issues,
                    resolved_issues,
                    actions_taken,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let mut state = self.state.lock().await;

        // Phase 1: evaluate detection rules per running agent
        let mut detections: Vec<Detection> = Vec::new();
        for agent in &agents {
            let session = match self.sessions.active_session(&agent.id).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(agent = %agent.id, error = %e, "session query failed");
                    self.metrics.check_errors.fetch_add(1, Ordering::Relaxed);
                    None
                }
            };
            let session_id = session.as_ref().map(|s| s.id.clone());

            let tracker = state
                .trackers
                .entry(agent.id.clone())
                .or_insert_with(|| AgentTracker::observed(now));
            tracker.last_checked_at = Some(now);

            let window = Duration::milliseconds(self.config.error_window_ms as i64);

            if tracker.crashed {
                detections.push(Detection {
                    agent: agent.clone(),
                    issue_type: IssueType::ProcessCrashed,
                    severity: IssueSeverity::Critical,
                    context: "agent process crashed".to_string(),
                    session_id: session_id.clone(),
                });
            }

            if let Some(silence) = tracker.silence(now) {
                let threshold = Duration::milliseconds(self.config.no_output_threshold_ms as i64);
                if silence > threshold {
                    let severity = if silence < threshold + Duration::minutes(15) {
                        IssueSeverity::Warning
                    } else {
                        IssueSeverity::Error
                    };
                    detections.push(Detection {
                        agent: agent.clone(),
                        issue_type: IssueType::NoOutput,
                        severity,
                        context: format!("no output for {}s", silence.num_seconds()),
                        session_id: session_id.clone(),
                    });
                }
            }

            let errors = tracker.errors_in_window(now, window);
            if errors >= self.config.error_count_threshold {
                let severity = if errors > 10 {
                    IssueSeverity::Critical
                } else {
                    IssueSeverity::Error
                };
                detections.push(Detection {
                    agent: agent.clone(),
                    issue_type: IssueType::RepeatedErrors,
                    severity,
                    context: format!("{errors} errors in window"),
                    session_id: session_id.clone(),
                });
            }

            if let Some(rate) = tracker.error_rate(now, window) {
                if rate > 0.5 {
                    detections.push(Detection {
                        agent: agent.clone(),
                        issue_type: IssueType::HighErrorRate,
                        severity: IssueSeverity::Error,
                        context: format!("error rate {:.0}%", rate * 100.0),
                        session_id: session_id.clone(),
                    });
                }
            }

            if let Some(session) = &session {
                let stale =
                    Duration::milliseconds(self.config.stale_session_threshold_ms as i64);
                if now - session.last_activity_at > stale {
                    detections.push(Detection {
                        agent: agent.clone(),
                        issue_type: IssueType::SessionStale,
                        severity: IssueSeverity::Warning,
                        context: format!(
                            "session inactive for {}s",
                            (now - session.last_activity_at).num_seconds()
                        ),
                        session_id: session_id.clone(),
                    });
                }
            }

            if tracker.ping_attempts >= self.config.max_ping_attempts {
                let unanswered = match (tracker.last_ping_at, tracker.last_output_at) {
                    (Some(ping), Some(output)) => output < ping,
                    (Some(_), None) => true,
                    _ => false,
                };
                if unanswered {
                    // No session left to restart means the agent is truly gone
                    let severity = if session.is_none() {
                        IssueSeverity::Critical
                    } else {
                        IssueSeverity::Error
                    };
                    detections.push(Detection {
                        agent: agent.clone(),
                        issue_type: IssueType::Unresponsive,
                        severity,
                        context: format!(
                            "{} pings unanswered",
                            tracker.ping_attempts
                        ),
                        session_id: session_id.clone(),
                    });
                }
            }
        }

        // Crash issues outlive their session: the agent may already be gone
        // from the running set, but the reassignment still has to happen
        let crash_agents: Vec<AgentId> = state
            .active_issues
            .values()
            .filter(|i| i.issue_type == IssueType::ProcessCrashed)
            .map(|i| i.agent_id.clone())
            .collect();
        for agent_id in crash_agents {
            let already = detections
                .iter()
                .any(|d| d.agent.id == agent_id && d.issue_type == IssueType::ProcessCrashed);
            if already {
                continue;
            }
            if let Ok(Some(agent)) = self.registry.get(&agent_id).await {
                detections.push(Detection {
                    agent,
                    issue_type: IssueType::ProcessCrashed,
                    severity: IssueSeverity::Critical,
                    context: "agent process crashed".to_string(),
                    session_id: None,
                });
            }
        }

        // Phase 2: re-check active issues for the agents we scanned; one
        // whose condition no longer fired is resolved. Issues for agents
        // outside the running set cannot be re-checked and stay put.
        let detected_keys: HashSet<IssueKey> = detections
            .iter()
            .map(|d| (d.agent.id.clone(), d.issue_type))
            .collect();
        let scanned: HashSet<AgentId> = agents.iter().map(|a| a.id.clone()).collect();
        let cleared: Vec<IssueKey> = state
            .active_issues
            .keys()
            .filter(|key| scanned.contains(&key.0) && !detected_keys.contains(key))
            .cloned()
            .collect();
        for key in cleared {
            if let Some(issue) = state.active_issues.remove(&key) {
                state.notified.remove(&key);
                self.metrics.issues_resolved.fetch_add(1, Ordering::Relaxed);
                self.events.publish(OrchestratorEvent::IssueResolved {
                    issue: issue.clone(),
                });
                resolved_issues.push(issue);
            }
        }

        // Phase 3: dedup into the active map
        for detection in &detections {
            let key = (detection.agent.id.clone(), detection.issue_type);
            match state.active_issues.get_mut(&key) {
                Some(existing) => {
                    existing.touch(detection.severity, detection.context.clone());
                    if existing.session_id.is_none() {
                        existing.session_id = detection.session_id.clone();
                    }
                }
                None => {
                    let mut new_issue = HealthIssue::new(
                        detection.agent.id.clone(),
                        detection.agent.role,
                        detection.issue_type,
                        detection.severity,
                        detection.context.clone(),
                    );
                    if let Some(session_id) = &detection.session_id {
                        new_issue = new_issue.with_session(session_id.clone());
                    }
                    state.active_issues.insert(key, new_issue.clone());
                    self.metrics.issues_detected.fetch_add(1, Ordering::Relaxed);
                    self.events.publish(OrchestratorEvent::IssueDetected {
                        issue: new_issue.clone(),
                    });
                    new_issues.push(new_issue);
                }
            }
        }

        // Phase 4: corrective actions for everything detected this scan.
        // At most one disruptive action per agent per scan; once a restart
        // or reassignment lands, the agent's remaining issues wait for the
        // next scan to be re-evaluated.
        let mut disrupted: HashSet<AgentId> = HashSet::new();
        for detection in &detections {
            if disrupted.contains(&detection.agent.id) {
                continue;
            }
            let key = (detection.agent.id.clone(), detection.issue_type);
            let Some(issue) = state.active_issues.get(&key).cloned() else {
                continue;
            };
            let ping_attempts = state
                .trackers
                .get(&detection.agent.id)
                .map(|t| t.ping_attempts)
                .unwrap_or(0);
            let action = decide_action(&issue, ping_attempts, &self.config);

            // Director alerts fire once per issue activation
            if action == HealthAction::NotifyDirector && state.notified.contains(&key) {
                continue;
            }
            if action == HealthAction::Monitor {
                continue;
            }

            let record = self.execute_action(action, &issue, &mut state, now).await;
            if record.succeeded {
                match action {
                    HealthAction::Restart => {
                        disrupted.insert(detection.agent.id.clone());
                        // The restart is the corrective for the whole ping
                        // ladder on this agent
                        for issue_type in [
                            IssueType::NoOutput,
                            IssueType::SessionStale,
                            IssueType::Unresponsive,
                        ] {
                            let ladder_key = (detection.agent.id.clone(), issue_type);
                            if let Some(resolved) = state.active_issues.remove(&ladder_key) {
                                state.notified.remove(&ladder_key);
                                self.metrics.issues_resolved.fetch_add(1, Ordering::Relaxed);
                                self.events.publish(OrchestratorEvent::IssueResolved {
                                    issue: resolved.clone(),
                                });
                                resolved_issues.push(resolved);
                            }
                        }
                    }
                    HealthAction::ReassignTask => {
                        disrupted.insert(detection.agent.id.clone());
                        if let Some(resolved) = state.active_issues.remove(&key) {
                            state.notified.remove(&key);
                            self.metrics.issues_resolved.fetch_add(1, Ordering::Relaxed);
                            self.events.publish(OrchestratorEvent::IssueResolved {
                                issue: resolved.clone(),
                            });
                            resolved_issues.push(resolved);
                        }
                    }
                    _ => {}
                }
            }
            self.metrics.actions_taken.fetch_add(1, Ordering::Relaxed);
            self.events.publish(OrchestratorEvent::ActionTaken {
                action: record.clone(),
            });
            actions_taken.push(record);
        }

        let agents_with_issues = state
            .active_issues
            .keys()
            .map(|(agent, _)| agent.clone())
            .collect::<HashSet<_>>()
            .len();

        drop(state);

        ScanReport {
            timestamp: now,
            agents_checked: agents.len(),
            agents_with_issues,
            new_issues,
            resolved_issues,
            actions_taken,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn execute_action(
        &self,
        action: HealthAction,
        issue: &HealthIssue,
        state: &mut StewardState,
        now: DateTime<Utc>,
    ) -> ActionRecord {
        let key = issue.key();
        match action {
            HealthAction::SendPing => {
                // The attempt counts whether or not delivery works
                if let Some(tracker) = state.trackers.get_mut(&issue.agent_id) {
                    tracker.record_ping(now);
                }
                match self.find_session(issue).await {
                    Some(session_id) => {
                        let delivered = self
                            .sessions
                            .message_session(
                                &session_id,
                                "health check: please report your current status",
                            )
                            .await;
                        match delivered {
                            Ok(outcome) => ActionRecord::new(
                                issue,
                                action,
                                outcome.success,
                                format!("ping sent to {session_id}"),
                            ),
                            Err(e) => {
                                ActionRecord::new(issue, action, false, format!("ping failed: {e}"))
                            }
                        }
                    }
                    None => ActionRecord::new(issue, action, false, "no active session to ping"),
                }
            }
            HealthAction::Restart => {
                let stopped = match self.find_session(issue).await {
                    Some(session_id) => self
                        .sessions
                        .stop_session(&session_id, StopOptions::graceful("health restart"))
                        .await
                        .map(|_| format!("stopped session {session_id}")),
                    // Nothing running: the restart reduces to a state reset
                    None => Ok("no active session, state reset only".to_string()),
                };
                match stopped {
                    Ok(detail) => {
                        if let Some(tracker) = state.trackers.get_mut(&issue.agent_id) {
                            tracker.reset_after_restart();
                        }
                        ActionRecord::new(issue, action, true, detail)
                    }
                    Err(e) => ActionRecord::new(issue, action, false, format!("stop failed: {e}")),
                }
            }
            HealthAction::NotifyDirector => {
                let record = self.notify_director(issue, action).await;
                if record.succeeded {
                    state.notified.insert(key);
                }
                record
            }
            HealthAction::ReassignTask => {
                let Some(task_id) = issue.task_id.clone() else {
                    return ActionRecord::new(issue, action, false, "no task to reassign");
                };
                if let Some(session_id) = self.find_session(issue).await {
                    if let Err(e) = self
                        .sessions
                        .stop_session(&session_id, StopOptions::forced("task reassignment"))
                        .await
                    {
                        warn!(session = %session_id, error = %e, "forced stop failed");
                    }
                }
                match self.assignment.unassign_task(&task_id).await {
                    Ok(_) => {
                        if let Some(tracker) = state.trackers.get_mut(&issue.agent_id) {
                            tracker.crashed = false;
                        }
                        ActionRecord::new(
                            issue,
                            action,
                            true,
                            format!("task {task_id} returned to the pool"),
                        )
                    }
                    Err(e) => {
                        ActionRecord::new(issue, action, false, format!("unassign failed: {e}"))
                    }
                }
            }
            HealthAction::Escalate => {
                if let Some(active) = state.active_issues.get_mut(&key) {
                    active.needs_human_review = true;
                }
                let record = self.notify_director(issue, action).await;
                if record.succeeded {
                    state.notified.insert(key);
                }
                record
            }
            HealthAction::Monitor => ActionRecord::new(issue, action, true, "monitoring"),
        }
    }

    async fn find_session(&self, issue: &HealthIssue) -> Option<SessionId> {
        if let Some(session_id) = &issue.session_id {
            return Some(session_id.clone());
        }
        match self.sessions.active_session(&issue.agent_id).await {
            Ok(session) => session.map(|s| s.id),
            Err(_) => None,
        }
    }

    async fn notify_director(&self, issue: &HealthIssue, action: HealthAction) -> ActionRecord {
        let director = match self
            .registry
            .list_by_role(crate::model::AgentRole::Director)
            .await
        {
            Ok(directors) => directors.into_iter().next(),
            Err(e) => {
                return ActionRecord::new(issue, action, false, format!("registry failed: {e}"))
            }
        };
        let Some(director) = director else {
            return ActionRecord::new(issue, action, false, "no director registered");
        };

        let content = format!(
            "health alert: {} on {} ({}) — {}",
            issue.issue_type, issue.agent_id, issue.severity, issue.context
        );
        let metadata = serde_json::json!({
            "issue_id": issue.id,
            "agent_id": issue.agent_id,
            "issue_type": issue.issue_type,
            "severity": issue.severity,
            "occurrence_count": issue.occurrence_count,
            "task_id": issue.task_id,
        });
        match self
            .dispatch
            .notify_agent(&director.id, DispatchKind::HealthAlert, &content, metadata)
            .await
        {
            Ok(()) => ActionRecord::new(
                issue,
                action,
                true,
                format!("director {} notified", director.id),
            ),
            Err(e) => ActionRecord::new(issue, action, false, format!("dispatch failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HealthConfig::default();
        assert_eq!(config.no_output_threshold_ms, 300_000);
        assert_eq!(config.error_count_threshold, 5);
        assert_eq!(config.error_window_ms, 600_000);
        assert_eq!(config.stale_session_threshold_ms, 900_000);
        assert_eq!(config.health_check_interval_ms, 60_000);
        assert_eq!(config.max_ping_attempts, 3);
        assert!(config.auto_restart);
        assert!(config.auto_reassign);
        assert!(config.notify_director);
    }

    #[test]
    fn test_config_partial_override() {
        let config: HealthConfig =
            serde_json::from_str(r#"{"max_ping_attempts": 5, "auto_restart": false}"#).unwrap();
        assert_eq!(config.max_ping_attempts, 5);
        assert!(!config.auto_restart);
        // Untouched options keep their defaults
        assert_eq!(config.error_count_threshold, 5);
    }

    #[test]
    fn test_config_rejects_unknown_options() {
        let result = serde_json::from_str::<HealthConfig>(r#"{"ping_budget": 9}"#);
        assert!(result.is_err());
    }
}
