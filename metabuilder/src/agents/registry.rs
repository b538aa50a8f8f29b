//! Lookup table from role to agent.

use dashmap::DashMap;
use std::sync::Arc;

use super::{Agent, AgentError, AgentRole};

/// Registry of agents, owned by the composition root and shared by workers.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentRole, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent under its own role, replacing any previous one.
    pub fn register(&self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        self.agents.insert(agent.role(), agent)
    }

    /// Registers an agent, builder style.
    #[must_use]
    pub fn with(self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Removes the agent for a role.
    pub fn unregister(&self, role: AgentRole) -> Option<Arc<dyn Agent>> {
        self.agents.remove(&role).map(|(_, agent)| agent)
    }

    /// Gets the agent for a role.
    pub fn get(&self, role: AgentRole) -> Result<Arc<dyn Agent>, AgentError> {
        self.agents
            .get(&role)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(AgentError::NotRegistered { role })
    }

    /// Returns true if the role has an agent.
    #[must_use]
    pub fn contains(&self, role: AgentRole) -> bool {
        self.agents.contains_key(&role)
    }

    /// Roles with no registered agent.
    #[must_use]
    pub fn missing_roles(&self, roles: &[AgentRole]) -> Vec<AgentRole> {
        roles.iter().copied().filter(|r| !self.contains(*r)).collect()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Returns true if no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
