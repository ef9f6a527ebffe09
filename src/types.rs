// src/types.rs

//! Small shared enums used across the session, mirror and wire layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a server session.
///
/// A freshly created session starts in `Lost` (no confirmed connection yet)
/// and moves to `Normal` once the initial reset or a news poll succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectState {
    /// The user explicitly disconnected; nothing is sent to the server.
    Disconnected,
    /// The last reset/news/sync attempt failed.
    #[default]
    Lost,
    /// The server answered the last poll.
    Normal,
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectState::Disconnected => "disconnected",
            ConnectState::Lost => "lost",
            ConnectState::Normal => "normal",
        };
        f.write_str(s)
    }
}

/// What the session is busy with, besides steady-state polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    #[default]
    NoActivity,
    /// A reset (initial load or full reload) is in progress.
    LoadActivity,
    /// The local mirror is being rebuilt from the current definition.
    RescanActivity,
}

/// Run state of the remote server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRunState {
    Halted,
    Shutdown,
    #[default]
    Running,
}

/// State of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Unknown,
    Complete,
    Queued,
    Submitted,
    Active,
    Aborted,
}

impl NodeState {
    /// Significance used when computing an aggregate state: the most
    /// significant child state wins.
    pub fn rank(self) -> u8 {
        match self {
            NodeState::Unknown => 0,
            NodeState::Complete => 1,
            NodeState::Queued => 2,
            NodeState::Submitted => 3,
            NodeState::Active => 4,
            NodeState::Aborted => 5,
        }
    }
}

/// Kind of node in the workflow tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Suite,
    Family,
    Task,
    Alias,
}

/// Facet of a node (or of the server) that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    State,
    Suspended,
    DefStatus,
    Label,
    Event,
    Meter,
    Variable,
    Limit,
    Repeat,
    Late,
    Flag,
    AddRemoveAttr,
    AddRemoveNode,
    Order,
    ServerState,
    ServerVariable,
}

impl Aspect {
    /// Aspects that change the shape of the tree rather than a node's content.
    pub fn is_structural(self) -> bool {
        matches!(self, Aspect::AddRemoveNode | Aspect::Order)
    }

    /// Aspects carried by the node's attribute map.
    pub fn is_attribute(self) -> bool {
        matches!(
            self,
            Aspect::Label
                | Aspect::Event
                | Aspect::Meter
                | Aspect::Variable
                | Aspect::Limit
                | Aspect::Repeat
                | Aspect::Late
                | Aspect::Flag
                | Aspect::AddRemoveAttr
        )
    }
}
