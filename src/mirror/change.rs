// src/mirror/change.rs

//! Change records passed through mirror transactions and on to observers.

/// Filled by `begin_scan`: what the finished scan will contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerChange {
    /// Number of suites the scan will add.
    pub suite_num: usize,
    /// Number of nodes the scan will add, suites included.
    pub total_num: usize,
}

/// Filled by `begin_update` / `end_update` for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeChange {
    /// Skip the update entirely: no notifications, no mutation.
    pub ignore: bool,
    /// Attribute count before the update.
    pub cached_attr_num: usize,
    /// Attribute count after the update.
    pub attr_num: usize,
}
