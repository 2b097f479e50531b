//! Agent registry implementation

use dashmap::DashMap;
use std::sync::{Arc, PoisonError, RwLock};

use wp_core::{Agent, AgentTag};

/// Directory of connected agents plus the operator's active selection
pub struct AgentRegistry {
    /// Agents indexed by tag
    agents: DashMap<AgentTag, Arc<Agent>>,
    /// Default target for commands and modules
    active: RwLock<Option<AgentTag>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            active: RwLock::new(None),
        }
    }

    /// Add or replace an agent
    pub fn insert(&self, agent: Agent) {
        self.agents.insert(agent.tag.clone(), Arc::new(agent));
    }

    /// Remove an agent, clearing the selection if it pointed there
    pub fn remove(&self, tag: &AgentTag) -> Option<Arc<Agent>> {
        let removed = self.agents.remove(tag).map(|(_, agent)| agent);
        if removed.is_some() {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            if active.as_ref() == Some(tag) {
                tracing::info!("Active agent {} went away", tag);
                *active = None;
            }
        }
        removed
    }

    /// Get an agent by tag
    pub fn get(&self, tag: &AgentTag) -> Option<Arc<Agent>> {
        self.agents.get(tag).map(|r| Arc::clone(&r))
    }

    /// All agents, sorted by tag
    pub fn list(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<_> = self.agents.iter().map(|r| Arc::clone(&r)).collect();
        agents.sort_by(|a, b| a.tag.cmp(&b.tag));
        agents
    }

    /// Replace the whole directory with a fresh listing.
    ///
    /// Agents missing from the listing are dropped unless `still_connected`
    /// reports them; the listing may predate their registration.
    pub fn replace_all(&self, agents: Vec<Agent>, still_connected: impl Fn(&AgentTag) -> bool) {
        let fresh: std::collections::HashSet<AgentTag> =
            agents.iter().map(|a| a.tag.clone()).collect();

        let stale: Vec<AgentTag> = self
            .agents
            .iter()
            .filter(|r| !fresh.contains(r.key()))
            .map(|r| r.key().clone())
            .filter(|tag| !still_connected(tag))
            .collect();
        for tag in stale {
            self.remove(&tag);
        }

        for agent in agents {
            self.insert(agent);
        }
    }

    /// Select the default target. Returns false for unknown tags.
    pub fn set_active(&self, tag: &AgentTag) -> bool {
        if !self.agents.contains_key(tag) {
            return false;
        }
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(tag.clone());
        true
    }

    /// Clear the default target
    pub fn clear_active(&self) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Currently selected agent, if it is still connected
    pub fn active_agent(&self) -> Option<Arc<Agent>> {
        let tag = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        self.get(&tag)
    }

    /// Number of known agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
