//! Session registry

use dashmap::DashMap;
use std::sync::Arc;

use wp_core::Protocol;

use super::session::PortFwdSession;

/// Live port-forward sessions indexed by id
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<PortFwdSession>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, session: Arc<PortFwdSession>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Arc<PortFwdSession>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// Get a session by id
    pub fn get(&self, id: &str) -> Option<Arc<PortFwdSession>> {
        self.sessions.get(id).map(|r| Arc::clone(&r))
    }

    /// All sessions, oldest first
    pub fn list(&self) -> Vec<Arc<PortFwdSession>> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|r| Arc::clone(&r)).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Sessions with exactly this (destination, listen port, protocol) key
    pub fn find_matching(&self, to: &str, listen_port: &str, protocol: Protocol) -> Vec<Arc<PortFwdSession>> {
        self.sessions
            .iter()
            .filter(|r| r.matches(to, listen_port, protocol))
            .map(|r| Arc::clone(&r))
            .collect()
    }

    /// Sessions whose description is one of `descriptions`
    pub fn find_by_description(&self, descriptions: &[&str]) -> Vec<Arc<PortFwdSession>> {
        self.sessions
            .iter()
            .filter(|r| descriptions.contains(&r.spec.description.as_str()))
            .map(|r| Arc::clone(&r))
            .collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
