//! Session manager seam
//!
//! The session manager owns the actual agent processes. The core only asks
//! three things of it: what is running, deliver a message, stop a session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorResult;
use crate::model::{AgentId, AgentSessionStatus, SessionId};

/// A live agent session as reported by the session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: SessionId,
    pub status: AgentSessionStatus,
    pub last_activity_at: DateTime<Utc>,
}

/// How to take a session down
#[derive(Debug, Clone)]
pub struct StopOptions {
    pub graceful: bool,
    pub reason: String,
}

impl StopOptions {
    pub fn graceful(reason: impl Into<String>) -> Self {
        Self {
            graceful: true,
            reason: reason.into(),
        }
    }

    pub fn forced(reason: impl Into<String>) -> Self {
        Self {
            graceful: false,
            reason: reason.into(),
        }
    }
}

/// Delivery receipt for a session message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOutcome {
    pub success: bool,
}

/// Control surface over agent sessions
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// The agent's current session, if one is live
    async fn active_session(&self, agent: &AgentId) -> OrchestratorResult<Option<ActiveSession>>;

    /// Post a message into a running session
    async fn message_session(
        &self,
        session: &SessionId,
        content: &str,
    ) -> OrchestratorResult<MessageOutcome>;

    /// Stop a session, gracefully or not
    async fn stop_session(&self, session: &SessionId, opts: StopOptions) -> OrchestratorResult<()>;
}
