//! Corrective-action policy
//!
//! Pure decision function: an issue plus the current ping state maps to
//! exactly one action. Execution lives in the steward; keeping the mapping
//! side-effect free makes the policy table testable on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::issue::{HealthIssue, IssueSeverity, IssueType};
use super::HealthConfig;
use crate::model::AgentId;

/// Actions the steward can take against a problem agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthAction {
    SendPing,
    Restart,
    NotifyDirector,
    ReassignTask,
    Escalate,
    Monitor,
}

impl std::fmt::Display for HealthAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SendPing => "send_ping",
            Self::Restart => "restart",
            Self::NotifyDirector => "notify_director",
            Self::ReassignTask => "reassign_task",
            Self::Escalate => "escalate",
            Self::Monitor => "monitor",
        };
        f.write_str(s)
    }
}

/// Outcome of one executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub agent_id: AgentId,
    pub issue_type: IssueType,
    pub action: HealthAction,
    pub succeeded: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(
        issue: &HealthIssue,
        action: HealthAction,
        succeeded: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: issue.agent_id.clone(),
            issue_type: issue.issue_type,
            action,
            succeeded,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

/// Deterministic issue → action mapping
///
/// `ping_attempts` is the count of pings already sent to this agent since
/// the last restart.
pub fn decide_action(issue: &HealthIssue, ping_attempts: u32, config: &HealthConfig) -> HealthAction {
    match issue.issue_type {
        IssueType::ProcessCrashed => {
            if config.auto_reassign && issue.task_id.is_some() {
                HealthAction::ReassignTask
            } else {
                HealthAction::NotifyDirector
            }
        }
        IssueType::NoOutput | IssueType::SessionStale => {
            if ping_attempts < config.max_ping_attempts {
                HealthAction::SendPing
            } else if config.auto_restart {
                HealthAction::Restart
            } else {
                HealthAction::NotifyDirector
            }
        }
        IssueType::RepeatedErrors | IssueType::HighErrorRate => {
            if config.notify_director {
                HealthAction::NotifyDirector
            } else {
                HealthAction::Monitor
            }
        }
        IssueType::Unresponsive => {
            if issue.severity == IssueSeverity::Critical {
                HealthAction::Escalate
            } else if config.auto_restart {
                HealthAction::Restart
            } else {
                HealthAction::NotifyDirector
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentRole, TaskId};

    fn issue(issue_type: IssueType, severity: IssueSeverity) -> HealthIssue {
        HealthIssue::new(
            AgentId::parse("ag-wk1").unwrap(),
            AgentRole::Worker,
            issue_type,
            severity,
            "test",
        )
    }

    #[test]
    fn test_crash_policy() {
        let config = HealthConfig::default();
        let with_task = issue(IssueType::ProcessCrashed, IssueSeverity::Critical)
            .with_task(TaskId::parse("el-abc").unwrap());
        assert_eq!(
            decide_action(&with_task, 0, &config),
            HealthAction::ReassignTask
        );

        // No task to hand back: the director hears about it instead
        let without_task = issue(IssueType::ProcessCrashed, IssueSeverity::Critical);
        assert_eq!(
            decide_action(&without_task, 0, &config),
            HealthAction::NotifyDirector
        );

        let no_reassign = HealthConfig {
            auto_reassign: false,
            ..Default::default()
        };
        assert_eq!(
            decide_action(&with_task, 0, &no_reassign),
            HealthAction::NotifyDirector
        );
    }

    #[test]
    fn test_silence_escalates_ping_to_restart() {
        let config = HealthConfig {
            max_ping_attempts: 2,
            ..Default::default()
        };
        let silent = issue(IssueType::NoOutput, IssueSeverity::Warning);
        assert_eq!(decide_action(&silent, 0, &config), HealthAction::SendPing);
        assert_eq!(decide_action(&silent, 1, &config), HealthAction::SendPing);
        assert_eq!(decide_action(&silent, 2, &config), HealthAction::Restart);

        let no_restart = HealthConfig {
            max_ping_attempts: 2,
            auto_restart: false,
            ..Default::default()
        };
        assert_eq!(
            decide_action(&silent, 2, &no_restart),
            HealthAction::NotifyDirector
        );

        let stale = issue(IssueType::SessionStale, IssueSeverity::Warning);
        assert_eq!(decide_action(&stale, 0, &config), HealthAction::SendPing);
    }

    #[test]
    fn test_error_noise_notifies_or_monitors() {
        let config = HealthConfig::default();
        let noisy = issue(IssueType::RepeatedErrors, IssueSeverity::Error);
        assert_eq!(
            decide_action(&noisy, 0, &config),
            HealthAction::NotifyDirector
        );

        let quiet_config = HealthConfig {
            notify_director: false,
            ..Default::default()
        };
        assert_eq!(
            decide_action(&noisy, 0, &quiet_config),
            HealthAction::Monitor
        );

        let rate = issue(IssueType::HighErrorRate, IssueSeverity::Error);
        assert_eq!(
            decide_action(&rate, 0, &config),
            HealthAction::NotifyDirector
        );
    }

    #[test]
    fn test_unresponsive_policy() {
        let config = HealthConfig::default();
        let critical = issue(IssueType::Unresponsive, IssueSeverity::Critical);
        assert_eq!(decide_action(&critical, 3, &config), HealthAction::Escalate);

        let error = issue(IssueType::Unresponsive, IssueSeverity::Error);
        assert_eq!(decide_action(&error, 3, &config), HealthAction::Restart);

        let no_restart = HealthConfig {
            auto_restart: false,
            ..Default::default()
        };
        assert_eq!(
            decide_action(&error, 3, &no_restart),
            HealthAction::NotifyDirector
        );
    }
}
