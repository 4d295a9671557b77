//! Registry of connected companion nodes and their action catalogs.

use std::collections::HashMap;

use clawgate_tools::{NodeAction, NodeActions};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node not found")]
    NodeNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A connected companion node.
#[derive(Debug, Clone)]
pub struct NodeSession {
    pub node_id: String,
    pub conn_id: String,
    pub display_name: Option<String>,
    pub platform: String,
    pub version: String,
    pub actions: Vec<NodeAction>,
    pub permissions: HashMap<String, bool>,
    pub connected_at_ms: u64,
}

/// node_id → NodeSession, with a conn_id reverse index for disconnect
/// cleanup.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeSession>,
    by_conn: HashMap<String, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; a reconnect with the same node_id replaces the old
    /// session.
    pub fn register(&mut self, session: NodeSession) {
        self.by_conn
            .insert(session.conn_id.clone(), session.node_id.clone());
        tracing::info!(
            node_id = %session.node_id,
            platform = %session.platform,
            actions = session.actions.len(),
            "node registered"
        );
        self.nodes.insert(session.node_id.clone(), session);
    }

    pub fn unregister_by_conn(&mut self, conn_id: &str) -> Option<NodeSession> {
        let node_id = self.by_conn.remove(conn_id)?;
        self.nodes.remove(&node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeSession> {
        self.nodes.get(node_id)
    }

    pub fn list(&self) -> Vec<&NodeSession> {
        let mut nodes: Vec<_> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Replace a node's action catalog.
    pub fn set_actions(&mut self, node_id: &str, actions: Vec<NodeAction>) -> Result<()> {
        let node = self.nodes.get_mut(node_id).ok_or(Error::NodeNotFound)?;
        node.actions = actions;
        Ok(())
    }

    /// Display name resolver for legacy session-key migration.
    pub fn display_name(&self, node_id: &str) -> Option<String> {
        self.nodes.get(node_id).and_then(|n| n.display_name.clone())
    }

    /// Action catalogs for the tools fabric.
    pub fn node_actions(&self) -> Vec<NodeActions> {
        self.list()
            .into_iter()
            .map(|n| NodeActions {
                node_id: n.node_id.clone(),
                node_name: n.display_name.clone(),
                actions: n.actions.clone(),
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session(node_id: &str, conn_id: &str) -> NodeSession {
        NodeSession {
            node_id: node_id.into(),
            conn_id: conn_id.into(),
            display_name: Some(format!("{node_id} box")),
            platform: "macos".into(),
            version: "1.0.0".into(),
            actions: vec![],
            permissions: HashMap::new(),
            connected_at_ms: 1,
        }
    }

    #[test]
    fn register_replaces_on_reconnect() {
        let mut reg = NodeRegistry::new();
        reg.register(session("n1", "c1"));
        reg.register(session("n1", "c2"));
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.get("n1").unwrap().conn_id, "c2");
    }

    #[test]
    fn unregister_by_conn_cleans_up() {
        let mut reg = NodeRegistry::new();
        reg.register(session("n1", "c1"));
        let removed = reg.unregister_by_conn("c1").unwrap();
        assert_eq!(removed.node_id, "n1");
        assert_eq!(reg.count(), 0);
        assert!(reg.unregister_by_conn("c1").is_none());
    }

    #[test]
    fn set_actions_unknown_node_errors() {
        let mut reg = NodeRegistry::new();
        assert!(reg.set_actions("ghost", vec![]).is_err());
    }

    #[test]
    fn list_is_sorted() {
        let mut reg = NodeRegistry::new();
        reg.register(session("zeta", "c1"));
        reg.register(session("alpha", "c2"));
        let ids: Vec<_> = reg.list().iter().map(|n| n.node_id.clone()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
