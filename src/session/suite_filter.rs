// src/session/suite_filter.rs

//! User-selected subset of suites kept in the local mirror.

use std::collections::BTreeSet;

use serde::Deserialize;

/// Which parts of a filter changed in [`SuiteFilter::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub enabled: bool,
    pub auto_add: bool,
    pub suites: bool,
}

impl ChangeFlags {
    pub fn any(self) -> bool {
        self.enabled || self.auto_add || self.suites
    }

    /// Only the auto-add flag changed; the server can be told without a reset.
    pub fn only_auto_add(self) -> bool {
        self.auto_add && !self.enabled && !self.suites
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteFilter {
    /// When disabled every suite is mirrored.
    #[serde(default)]
    pub enabled: bool,
    /// Add suites the server reports for the first time.
    #[serde(default)]
    pub auto_add_new: bool,
    #[serde(default)]
    pub suites: BTreeSet<String>,
    /// Suites the server reported in its last suite list.
    #[serde(skip)]
    pub loaded: Vec<String>,
}

impl SuiteFilter {
    /// Enabled filter selecting exactly `names`.
    pub fn with_suites<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            suites: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn accepts(&self, suite: &str) -> bool {
        !self.enabled || self.suites.contains(suite)
    }

    /// Suites to register with the server on reset. Empty means all.
    pub fn registered_suites(&self) -> Vec<String> {
        if self.enabled {
            self.suites.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// Take over the user-editable settings of `other`.
    pub fn update(&mut self, other: &SuiteFilter) -> ChangeFlags {
        let flags = ChangeFlags {
            enabled: self.enabled != other.enabled,
            auto_add: self.auto_add_new != other.auto_add_new,
            suites: self.suites != other.suites,
        };
        self.enabled = other.enabled;
        self.auto_add_new = other.auto_add_new;
        self.suites = other.suites.clone();
        flags
    }

    /// Record the server's suite list. With auto-add on, suites that appear
    /// after the first list join the selection.
    pub fn set_loaded(&mut self, names: &[String]) {
        if self.enabled && self.auto_add_new && !self.loaded.is_empty() {
            for name in names {
                if !self.loaded.contains(name) {
                    self.suites.insert(name.clone());
                }
            }
        }
        self.loaded = names.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_filter_accepts_everything() {
        let f = SuiteFilter::default();
        assert!(f.accepts("anything"));
        assert!(f.registered_suites().is_empty());
    }

    #[test]
    fn update_reports_what_changed() {
        let mut f = SuiteFilter::with_suites(["s1"]);
        let mut other = f.clone();
        other.auto_add_new = true;
        let flags = f.update(&other);
        assert!(flags.only_auto_add());

        other.suites.insert("s2".into());
        let flags = f.update(&other);
        assert!(flags.suites && !flags.only_auto_add());
        assert!(!f.update(&other).any());
    }

    #[test]
    fn auto_add_picks_up_new_suites_only() {
        let mut f = SuiteFilter::with_suites(["s1"]);
        f.auto_add_new = true;
        f.set_loaded(&["s1".into(), "s9".into()]);
        assert!(!f.accepts("s9"), "first list only records what exists");

        f.set_loaded(&["s1".into(), "s2".into()]);
        assert!(f.accepts("s2"));

        f.suites.remove("s2");
        f.set_loaded(&["s1".into(), "s2".into(), "s3".into()]);
        assert!(!f.accepts("s2"));
        assert!(f.accepts("s3"));
    }
}
