// src/mirror/node.rs

use std::collections::BTreeMap;

use crate::defs::NodeDef;
use crate::types::{NodeKind, NodeState};

/// One node of the local mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorNode {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub state: NodeState,
    pub suspended: bool,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<MirrorNode>,
}

impl MirrorNode {
    /// Build the subtree shadowing `def`, whose parent lives at `parent_path`.
    pub(crate) fn scan(def: &NodeDef, parent_path: &str) -> Self {
        let path = format!("{}/{}", parent_path.trim_end_matches('/'), def.name);
        let children = def
            .children
            .iter()
            .map(|child| MirrorNode::scan(child, &path))
            .collect();
        Self {
            name: def.name.clone(),
            kind: def.kind,
            state: def.state,
            suspended: def.suspended,
            attributes: def.attributes.clone(),
            children,
            path,
        }
    }

    pub fn num_of_children(&self) -> usize {
        self.children.len()
    }

    /// Number of nodes in this subtree, self included.
    pub fn total_num(&self) -> usize {
        1 + self.children.iter().map(MirrorNode::total_num).sum::<usize>()
    }

    pub(crate) fn child(&self, name: &str) -> Option<&MirrorNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut MirrorNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }
}
