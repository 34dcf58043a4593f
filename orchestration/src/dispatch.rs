//! Dispatch seam — notifications to agents
//!
//! Transport is out of scope; the core hands a structured notification to
//! whatever channel the host wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::OrchestratorResult;
use crate::model::AgentId;

/// Notification kinds the core emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchKind {
    TaskAssignment,
    HealthAlert,
}

impl std::fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TaskAssignment => "task-assignment",
            Self::HealthAlert => "health-alert",
        };
        f.write_str(s)
    }
}

/// Send-a-notification-to-agent channel
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn notify_agent(
        &self,
        agent: &AgentId,
        kind: DispatchKind,
        content: &str,
        metadata: serde_json::Value,
    ) -> OrchestratorResult<()>;
}

/// Dispatch that only logs; the daemon's default until a transport exists
pub struct LoggingDispatch;

#[async_trait]
impl Dispatch for LoggingDispatch {
    async fn notify_agent(
        &self,
        agent: &AgentId,
        kind: DispatchKind,
        content: &str,
        metadata: serde_json::Value,
    ) -> OrchestratorResult<()> {
        info!(agent = %agent, kind = %kind, %metadata, "notify: {content}");
        Ok(())
    }
}
