//! Agent registry seam
//!
//! Enumerates agent identities by role and session status and exposes their
//! concurrency caps. The production registry lives with the agent launcher;
//! [`InMemoryRegistry`] backs tests and the daemon.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::OrchestratorResult;
use crate::model::{Agent, AgentId, AgentRole, AgentSessionStatus};

/// Read-only view of the agent fleet
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Fetch one agent by id
    async fn get(&self, id: &AgentId) -> OrchestratorResult<Option<Agent>>;

    /// All agents, ordered by id
    async fn list_all(&self) -> OrchestratorResult<Vec<Agent>>;

    /// Agents holding a given role
    async fn list_by_role(&self, role: AgentRole) -> OrchestratorResult<Vec<Agent>>;

    /// Agents in a given session state
    async fn list_by_session_status(
        &self,
        status: AgentSessionStatus,
    ) -> OrchestratorResult<Vec<Agent>>;
}

/// HashMap-backed registry
pub struct InMemoryRegistry {
    agents: RwLock<HashMap<AgentId, Agent>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace an agent
    pub async fn put(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    /// Flip an agent's session status; no-op when the agent is unknown
    pub async fn set_session_status(&self, id: &AgentId, status: AgentSessionStatus) {
        if let Some(agent) = self.agents.write().await.get_mut(id) {
            agent.session_status = status;
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRegistry for InMemoryRegistry {
    async fn get(&self, id: &AgentId) -> OrchestratorResult<Option<Agent>> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn list_all(&self) -> OrchestratorResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn list_by_role(&self, role: AgentRole) -> OrchestratorResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.role == role)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn list_by_session_status(
        &self,
        status: AgentSessionStatus,
    ) -> OrchestratorResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.session_status == status)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(raw: &str, role: AgentRole, status: AgentSessionStatus) -> Agent {
        Agent::new(AgentId::parse(raw).unwrap(), raw, role).with_session_status(status)
    }

    #[tokio::test]
    async fn test_lookup_and_enumeration() {
        let registry = InMemoryRegistry::new();
        registry
            .put(agent("ag-dir", AgentRole::Director, AgentSessionStatus::Idle))
            .await;
        registry
            .put(agent("ag-wk1", AgentRole::Worker, AgentSessionStatus::Running))
            .await;
        registry
            .put(agent("ag-wk2", AgentRole::Worker, AgentSessionStatus::Running))
            .await;

        let id = AgentId::parse("ag-wk1").unwrap();
        assert!(registry.get(&id).await.unwrap().is_some());
        assert!(registry
            .get(&AgentId::parse("ag-zzz").unwrap())
            .await
            .unwrap()
            .is_none());

        assert_eq!(registry.list_all().await.unwrap().len(), 3);
        assert_eq!(
            registry.list_by_role(AgentRole::Worker).await.unwrap().len(),
            2
        );
        assert_eq!(
            registry
                .list_by_session_status(AgentSessionStatus::Running)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_set_session_status() {
        let registry = InMemoryRegistry::new();
        let id = AgentId::parse("ag-wk1").unwrap();
        registry
            .put(agent("ag-wk1", AgentRole::Worker, AgentSessionStatus::Idle))
            .await;
        registry
            .set_session_status(&id, AgentSessionStatus::Running)
            .await;
        assert_eq!(
            registry.get(&id).await.unwrap().unwrap().session_status,
            AgentSessionStatus::Running
        );
    }
}
