//! Health issue records
//!
//! Issues are in-memory only: they live from detection until their
//! originating condition clears. Dedup is keyed on (agent, issue type).

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AgentId, AgentRole, SessionId, TaskId};

/// Monotonic suffix keeping synthetic issue ids unique within a process
static ISSUE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Problem classes the steward can detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    NoOutput,
    RepeatedErrors,
    ProcessCrashed,
    HighErrorRate,
    SessionStale,
    Unresponsive,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoOutput => "no_output",
            Self::RepeatedErrors => "repeated_errors",
            Self::ProcessCrashed => "process_crashed",
            Self::HighErrorRate => "high_error_rate",
            Self::SessionStale => "session_stale",
            Self::Unresponsive => "unresponsive",
        };
        f.write_str(s)
    }
}

/// How bad an issue is; ordered so comparisons read naturally
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Dedup key for active issues
pub type IssueKey = (AgentId, IssueType);

/// One detected problem on one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    /// Synthetic id, unique per detection
    pub id: String,
    pub agent_id: AgentId,
    pub agent_role: AgentRole,
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub detected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrence_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Human-readable detail of what tripped the detection
    pub context: String,
    /// Set when an escalation marks the issue for human review
    #[serde(default)]
    pub needs_human_review: bool,
}

impl HealthIssue {
    pub fn new(
        agent_id: AgentId,
        agent_role: AgentRole,
        issue_type: IssueType,
        severity: IssueSeverity,
        context: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!(
                "{}:{}:{}",
                agent_id,
                issue_type,
                ISSUE_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
            agent_id,
            agent_role,
            issue_type,
            severity,
            detected_at: now,
            last_seen_at: now,
            occurrence_count: 1,
            task_id: None,
            session_id: None,
            context: context.into(),
            needs_human_review: false,
        }
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Dedup key
    pub fn key(&self) -> IssueKey {
        (self.agent_id.clone(), self.issue_type)
    }

    /// Fold a repeat detection into this issue
    pub fn touch(&mut self, severity: IssueSeverity, context: impl Into<String>) {
        self.last_seen_at = Utc::now();
        self.occurrence_count += 1;
        // Severity only ratchets upward while the issue is active
        if severity > self.severity {
            self.severity = severity;
        }
        self.context = context.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> HealthIssue {
        HealthIssue::new(
            AgentId::parse("ag-wk1").unwrap(),
            AgentRole::Worker,
            IssueType::NoOutput,
            IssueSeverity::Warning,
            "silent for 6m",
        )
    }

    #[test]
    fn test_touch_ratchets_severity() {
        let mut i = issue();
        assert_eq!(i.occurrence_count, 1);

        i.touch(IssueSeverity::Error, "silent for 21m");
        assert_eq!(i.occurrence_count, 2);
        assert_eq!(i.severity, IssueSeverity::Error);

        // A milder repeat does not lower it
        i.touch(IssueSeverity::Warning, "silent for 22m");
        assert_eq!(i.severity, IssueSeverity::Error);
        assert!(i.last_seen_at >= i.detected_at);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(IssueSeverity::Critical > IssueSeverity::Error);
        assert!(IssueSeverity::Error > IssueSeverity::Warning);
    }

    #[test]
    fn test_key_ignores_detection_time() {
        let a = issue();
        let b = issue();
        assert_ne!(a.id, b.id);
        assert_eq!(a.key(), b.key());
    }
}
