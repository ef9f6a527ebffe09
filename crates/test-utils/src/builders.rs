#![allow(dead_code)]

use std::collections::BTreeMap;

use suitelink::defs::{Defs, NodeDef, NodeUpdate};
use suitelink::types::{Aspect, NodeKind, NodeState};
use suitelink::wire::{News, ServerReply};

/// Builder for a [`Defs`] tree.
///
/// Paths are absolute (`/s1/f1/t1`); missing parents are created as
/// families (suites at the top level).
#[derive(Debug, Default)]
pub struct DefsBuilder {
    defs: Defs,
}

impl DefsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suite(self, name: &str) -> Self {
        self.with_node(&format!("/{name}"), NodeKind::Suite)
    }

    pub fn with_task(self, path: &str) -> Self {
        self.with_node(path, NodeKind::Task)
    }

    pub fn with_node(mut self, path: &str, kind: NodeKind) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((first, rest)) = segments.split_first() else {
            return self;
        };

        let suites = &mut self.defs.suites;
        let pos = match suites.iter().position(|s| s.name == *first) {
            Some(pos) => pos,
            None => {
                suites.push(NodeDef::new(*first, NodeKind::Suite));
                suites.len() - 1
            }
        };
        let mut node = &mut suites[pos];
        for (i, seg) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            let pos = match node.children.iter().position(|c| c.name == *seg) {
                Some(pos) => pos,
                None => {
                    let child_kind = if last { kind } else { NodeKind::Family };
                    node.children.push(NodeDef::new(*seg, child_kind));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[pos];
        }
        self
    }

    pub fn with_state(mut self, path: &str, state: NodeState) -> Self {
        if let Some(node) = self.defs.find_mut(path) {
            node.state = state;
        }
        self
    }

    pub fn suspended(mut self, suspended: bool) -> Self {
        self.defs.server.suspended = suspended;
        self
    }

    pub fn build(self) -> Defs {
        self.defs
    }
}

/// Two suites: `/s1/f1/t1`, `/s1/t2` and `/s2/t3`.
pub fn sample_defs() -> Defs {
    DefsBuilder::new()
        .with_task("/s1/f1/t1")
        .with_task("/s1/t2")
        .with_task("/s2/t3")
        .with_state("/s1", NodeState::Active)
        .build()
}

pub fn reset_reply(defs: Defs) -> ServerReply {
    ServerReply::defs(defs)
}

pub fn news_reply(news: News) -> ServerReply {
    ServerReply::news(news)
}

pub fn suite_list_reply(names: &[&str]) -> ServerReply {
    ServerReply::lines(names.iter().map(|s| s.to_string()).collect())
}

/// Sync reply with a single state change.
pub fn state_change(path: &str, state: NodeState) -> NodeUpdate {
    NodeUpdate::new(path, vec![Aspect::State]).with_state(state)
}

pub fn label_change(path: &str, name: &str, value: &str) -> NodeUpdate {
    let mut attrs = BTreeMap::new();
    attrs.insert(format!("label:{name}"), value.to_string());
    NodeUpdate::new(path, vec![Aspect::Label]).with_attributes(attrs)
}

pub fn structural_change(path: &str) -> NodeUpdate {
    NodeUpdate::new(path, vec![Aspect::AddRemoveNode])
}

pub fn sync_reply(changes: Vec<NodeUpdate>) -> ServerReply {
    ServerReply::changes(changes)
}
