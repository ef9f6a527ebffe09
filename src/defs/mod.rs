// src/defs/mod.rs

//! Client-side copy of the remote workflow definition.
//!
//! A reset downloads a full [`Defs`]; a sync either patches it with
//! [`NodeUpdate`]s or replaces it when the server asks for a full sync. The
//! local mirror is always scanned from this copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Aspect, NodeKind, NodeState, ServerRunState};

/// User variable stamped into the server state after a successful reset.
pub const NAME_IN_VIEWER_VAR: &str = "nameInViewer";

/// Server-level part of the definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    #[serde(default)]
    pub state: ServerRunState,
    #[serde(default)]
    pub suspended: bool,
    /// `(host, port)` of the server this copy came from. Set by the client.
    #[serde(default)]
    pub host_port: Option<(String, String)>,
    #[serde(default)]
    pub user_variables: BTreeMap<String, String>,
}

impl ServerState {
    pub fn add_or_update_user_variable(&mut self, name: &str, value: &str) {
        self.user_variables
            .insert(name.to_string(), value.to_string());
    }
}

/// One node of the remote tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub suspended: bool,
    /// Labels, events, meters, variables... keyed by `"<type>:<name>"`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<NodeDef>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&NodeDef> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut NodeDef> {
        self.children.iter_mut().find(|c| c.name == name)
    }
}

/// Full workflow definition as known by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Defs {
    #[serde(default)]
    pub server: ServerState,
    #[serde(default)]
    pub suites: Vec<NodeDef>,
}

impl Defs {
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    pub fn suite_names(&self) -> Vec<String> {
        self.suites.iter().map(|s| s.name.clone()).collect()
    }

    /// Find a node by absolute path (e.g. `/s1/f1/t1`).
    pub fn find(&self, path: &str) -> Option<&NodeDef> {
        let mut segments = path_segments(path);
        let first = segments.next()?;
        let mut node = self.suites.iter().find(|s| s.name == first)?;
        for seg in segments {
            node = node.child(seg)?;
        }
        Some(node)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut NodeDef> {
        let mut segments = path_segments(path);
        let first = segments.next()?;
        let mut node = self.suites.iter_mut().find(|s| s.name == first)?;
        for seg in segments {
            node = node.child_mut(seg)?;
        }
        Some(node)
    }

    /// Most significant state over all suites.
    pub fn state(&self) -> NodeState {
        self.suites
            .iter()
            .map(|s| s.state)
            .max_by_key(|s| s.rank())
            .unwrap_or_default()
    }

    pub fn is_suspended(&self) -> bool {
        self.server.suspended
    }

    /// Apply an incremental update. Returns `false` if the target node is not
    /// part of this definition (structural updates for new nodes land here).
    pub fn apply(&mut self, update: &NodeUpdate) -> bool {
        if update.is_server() {
            if let Some(state) = update.server_state {
                self.server.state = state;
            }
            if let Some(suspended) = update.suspended {
                self.server.suspended = suspended;
            }
            if let Some(vars) = &update.attributes {
                self.server.user_variables.extend(vars.clone());
            }
            return true;
        }

        match self.find_mut(&update.path) {
            Some(node) => {
                update.apply_to(&mut node.state, &mut node.suspended, &mut node.attributes);
                true
            }
            None => {
                debug!(path = %update.path, "update for node not present in definition");
                false
            }
        }
    }
}

/// Incremental change to one node (or to the server when `path == "/"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub path: String,
    #[serde(default)]
    pub aspects: Vec<Aspect>,
    #[serde(default)]
    pub state: Option<NodeState>,
    #[serde(default)]
    pub suspended: Option<bool>,
    /// Replacement attribute map (node) or variables to merge (server).
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub server_state: Option<ServerRunState>,
}

impl NodeUpdate {
    pub fn new(path: impl Into<String>, aspects: Vec<Aspect>) -> Self {
        Self {
            path: path.into(),
            aspects,
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_suspended(mut self, suspended: bool) -> Self {
        self.suspended = Some(suspended);
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_server_state(mut self, state: ServerRunState) -> Self {
        self.server_state = Some(state);
        self
    }

    /// Update addressed to the server rather than to a node.
    pub fn is_server(&self) -> bool {
        self.path.trim_matches('/').is_empty()
    }

    pub fn is_structural(&self) -> bool {
        self.aspects.iter().any(|a| a.is_structural())
    }

    pub(crate) fn apply_to(
        &self,
        state: &mut NodeState,
        suspended: &mut bool,
        attributes: &mut BTreeMap<String, String>,
    ) {
        if let Some(s) = self.state {
            *state = s;
        }
        if let Some(s) = self.suspended {
            *suspended = s;
        }
        if let Some(attrs) = &self.attributes {
            *attributes = attrs.clone();
        }
    }
}

/// Split an absolute node path into its non-empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Last segment of a node path, or `/` for the server root.
pub fn node_name(path: &str) -> &str {
    path_segments(path).last().unwrap_or("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Defs {
        let mut t1 = NodeDef::new("t1", NodeKind::Task);
        t1.state = NodeState::Queued;
        let mut f1 = NodeDef::new("f1", NodeKind::Family);
        f1.children.push(t1);
        let mut s1 = NodeDef::new("s1", NodeKind::Suite);
        s1.state = NodeState::Active;
        s1.children.push(f1);
        let mut s2 = NodeDef::new("s2", NodeKind::Suite);
        s2.state = NodeState::Aborted;
        Defs {
            server: ServerState::default(),
            suites: vec![s1, s2],
        }
    }

    #[test]
    fn find_walks_absolute_paths() {
        let defs = sample();
        assert_eq!(defs.find("/s1/f1/t1").map(|n| n.kind), Some(NodeKind::Task));
        assert!(defs.find("/s1/missing").is_none());
        assert!(defs.find("/").is_none());
    }

    #[test]
    fn aggregate_state_picks_most_significant() {
        assert_eq!(sample().state(), NodeState::Aborted);
        assert_eq!(Defs::default().state(), NodeState::Unknown);
    }

    #[test]
    fn apply_patches_node_and_server() {
        let mut defs = sample();
        let upd = NodeUpdate::new("/s1/f1/t1", vec![Aspect::State]).with_state(NodeState::Complete);
        assert!(defs.apply(&upd));
        assert_eq!(defs.find("/s1/f1/t1").map(|n| n.state), Some(NodeState::Complete));

        let srv = NodeUpdate::new("/", vec![Aspect::ServerState]).with_server_state(ServerRunState::Halted);
        assert!(defs.apply(&srv));
        assert_eq!(defs.server.state, ServerRunState::Halted);

        let unknown = NodeUpdate::new("/s9", vec![Aspect::State]);
        assert!(!defs.apply(&unknown));
    }

    #[test]
    fn node_name_of_root_is_slash() {
        assert_eq!(node_name("/"), "/");
        assert_eq!(node_name("/s1/f1"), "f1");
    }
}
