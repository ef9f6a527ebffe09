// src/mirror/mod.rs

//! Local mirror of the remote node tree.
//!
//! All mutation is bracketed: a full rebuild goes through
//! [`LocalMirror::begin_scan`] / [`LocalMirror::end_scan`], a single node
//! change through [`LocalMirror::begin_update`] /
//! [`LocalMirror::end_update`]. Between the two calls of a scan the
//! committed tree is untouched; the new suites become visible at once in
//! `end_scan`.

use thiserror::Error;
use tracing::debug;

use crate::defs::{Defs, NodeUpdate, path_segments};
use crate::session::SuiteFilter;
use crate::types::Aspect;

pub mod change;
pub mod node;

pub use change::{NodeChange, ServerChange};
pub use node::MirrorNode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    #[error("update for unknown node '{0}'")]
    UnknownNode(String),

    #[error("scan announced {expected} suites but produced {actual}")]
    ScanCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Default)]
pub struct LocalMirror {
    suites: Vec<MirrorNode>,
    staged: Option<Vec<MirrorNode>>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    pub fn num_of_children(&self) -> usize {
        self.suites.len()
    }

    pub fn total_num(&self) -> usize {
        self.suites.iter().map(MirrorNode::total_num).sum()
    }

    pub fn suites(&self) -> &[MirrorNode] {
        &self.suites
    }

    pub fn suite_names(&self) -> Vec<String> {
        self.suites.iter().map(|s| s.name.clone()).collect()
    }

    pub fn find(&self, path: &str) -> Option<&MirrorNode> {
        let mut segments = path_segments(path);
        let first = segments.next()?;
        let mut node = self.suites.iter().find(|s| s.name == first)?;
        for seg in segments {
            node = node.child(seg)?;
        }
        Some(node)
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut MirrorNode> {
        let mut segments = path_segments(path);
        let first = segments.next()?;
        let mut node = self.suites.iter_mut().find(|s| s.name == first)?;
        for seg in segments {
            node = node.child_mut(seg)?;
        }
        Some(node)
    }

    pub fn clear(&mut self) {
        self.suites.clear();
        self.staged = None;
    }

    /// Prepare a full rebuild from `defs`, keeping only suites the filter
    /// accepts. `change` receives the counts the rebuild will produce.
    pub fn begin_scan(&mut self, defs: &Defs, filter: &SuiteFilter, change: &mut ServerChange) {
        let staged: Vec<MirrorNode> = defs
            .suites
            .iter()
            .filter(|suite| filter.accepts(&suite.name))
            .map(|suite| MirrorNode::scan(suite, "/"))
            .collect();

        change.suite_num = staged.len();
        change.total_num = staged.iter().map(MirrorNode::total_num).sum();
        self.staged = Some(staged);
    }

    /// Commit the rebuild prepared by [`LocalMirror::begin_scan`].
    pub fn end_scan(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.suites = staged;
        }
    }

    /// Compare the committed tree with the counts announced at scan begin.
    pub fn check_scan(&self, change: &ServerChange) -> Result<(), MirrorError> {
        let actual = self.num_of_children();
        debug_assert_eq!(change.suite_num, actual, "scan count mismatch");
        if change.suite_num != actual {
            return Err(MirrorError::ScanCountMismatch {
                expected: change.suite_num,
                actual,
            });
        }
        Ok(())
    }

    /// Start a single-node update.
    ///
    /// Sets `change.ignore` when the mirror is empty or the node's suite is
    /// not mirrored. A mirrored suite missing the node is an error.
    pub fn begin_update(
        &self,
        path: &str,
        aspects: &[Aspect],
        change: &mut NodeChange,
    ) -> Result<(), MirrorError> {
        if self.is_empty() {
            change.ignore = true;
            return Ok(());
        }

        let Some(suite) = path_segments(path).next() else {
            return Err(MirrorError::UnknownNode(path.to_string()));
        };
        if !self.suites.iter().any(|s| s.name == suite) {
            debug!(path, "suite not mirrored; update ignored");
            change.ignore = true;
            return Ok(());
        }

        match self.find(path) {
            Some(node) => {
                change.ignore = false;
                change.cached_attr_num = node.attributes.len();
                debug!(path, ?aspects, "begin node update");
                Ok(())
            }
            None => Err(MirrorError::UnknownNode(path.to_string())),
        }
    }

    /// Apply the update started by [`LocalMirror::begin_update`].
    pub fn end_update(
        &mut self,
        update: &NodeUpdate,
        change: &mut NodeChange,
    ) -> Result<(), MirrorError> {
        if change.ignore {
            return Ok(());
        }
        let node = self
            .find_mut(&update.path)
            .ok_or_else(|| MirrorError::UnknownNode(update.path.clone()))?;
        update.apply_to(&mut node.state, &mut node.suspended, &mut node.attributes);
        change.attr_num = node.attributes.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::defs::NodeDef;
    use crate::types::{NodeKind, NodeState};

    fn defs() -> Defs {
        let mut s1 = NodeDef::new("s1", NodeKind::Suite);
        s1.children.push(NodeDef::new("t1", NodeKind::Task));
        let s2 = NodeDef::new("s2", NodeKind::Suite);
        Defs {
            suites: vec![s1, s2],
            ..Defs::default()
        }
    }

    fn scanned(filter: &SuiteFilter) -> LocalMirror {
        let mut mirror = LocalMirror::new();
        let mut change = ServerChange::default();
        mirror.begin_scan(&defs(), filter, &mut change);
        mirror.end_scan();
        mirror.check_scan(&change).unwrap();
        mirror
    }

    #[test]
    fn scan_is_invisible_until_end() {
        let mut mirror = LocalMirror::new();
        let mut change = ServerChange::default();
        mirror.begin_scan(&defs(), &SuiteFilter::default(), &mut change);
        assert_eq!(change.suite_num, 2);
        assert_eq!(change.total_num, 3);
        assert!(mirror.is_empty());

        mirror.end_scan();
        assert_eq!(mirror.num_of_children(), 2);
        assert_eq!(mirror.find("/s1/t1").map(|n| n.path.as_str()), Some("/s1/t1"));
    }

    #[test]
    fn filter_limits_scanned_suites() {
        let filter = SuiteFilter::with_suites(["s2"]);
        let mirror = scanned(&filter);
        assert_eq!(mirror.suite_names(), vec!["s2".to_string()]);
    }

    #[test]
    fn update_of_filtered_suite_is_ignored() {
        let mirror = scanned(&SuiteFilter::with_suites(["s2"]));
        let mut change = NodeChange::default();
        mirror
            .begin_update("/s1/t1", &[Aspect::State], &mut change)
            .unwrap();
        assert!(change.ignore);
    }

    #[test]
    fn update_on_empty_mirror_is_ignored() {
        let mirror = LocalMirror::new();
        let mut change = NodeChange::default();
        mirror.begin_update("/s1", &[Aspect::State], &mut change).unwrap();
        assert!(change.ignore);
    }

    #[test]
    fn unknown_node_in_mirrored_suite_is_an_error() {
        let mirror = scanned(&SuiteFilter::default());
        let mut change = NodeChange::default();
        let err = mirror
            .begin_update("/s1/nope", &[Aspect::State], &mut change)
            .unwrap_err();
        assert_eq!(err, MirrorError::UnknownNode("/s1/nope".into()));
    }

    #[test]
    fn end_update_mutates_and_counts_attributes() {
        let mut mirror = scanned(&SuiteFilter::default());
        let mut change = NodeChange::default();
        mirror.begin_update("/s1/t1", &[Aspect::Label], &mut change).unwrap();

        let mut attrs = BTreeMap::new();
        attrs.insert("label:info".to_string(), "running".to_string());
        let update = NodeUpdate::new("/s1/t1", vec![Aspect::Label, Aspect::State])
            .with_attributes(attrs)
            .with_state(NodeState::Active);
        mirror.end_update(&update, &mut change).unwrap();

        assert_eq!(change.cached_attr_num, 0);
        assert_eq!(change.attr_num, 1);
        assert_eq!(mirror.find("/s1/t1").map(|n| n.state), Some(NodeState::Active));
    }
}
