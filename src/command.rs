// src/command.rs

//! Named commands and placeholder substitution.
//!
//! A command template is a whitespace-separated token string such as
//! `--suspend <full_name>`. `<full_name>` expands to the absolute node
//! path of each target, `<node_name>` to its last path segment. A server
//! itself is targeted with the path `/`.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::defs::node_name;
use crate::errors::{Result, SuitelinkError};

pub const FULL_NAME_PLACEHOLDER: &str = "<full_name>";
pub const NODE_NAME_PLACEHOLDER: &str = "<node_name>";

/// Name -> template table, filled from `[commands]`.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(commands: BTreeMap<String, String>) -> Self {
        Self { commands }
    }

    /// Register (or replace) a named command.
    pub fn add(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.commands.insert(name.into(), template.into());
    }

    pub fn resolve(&self, name: &str) -> Result<&str> {
        match self.commands.get(name) {
            Some(template) => Ok(template.as_str()),
            None => {
                warn!(command = %name, "command is not registered");
                Err(SuitelinkError::CommandNotFound(name.to_string()))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A node (or the server itself, path `/`) on a named server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub server: String,
    pub path: String,
}

impl CommandTarget {
    pub fn node(server: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            path: path.into(),
        }
    }

    pub fn server(server: impl Into<String>) -> Self {
        Self::node(server, "/")
    }

    pub fn is_server(&self) -> bool {
        self.path == "/"
    }

    fn full_name(&self) -> &str {
        &self.path
    }

    fn node_name(&self) -> &str {
        if self.is_server() {
            "/"
        } else {
            node_name(&self.path)
        }
    }
}

/// Expand a template for several targets of one server and split it into
/// argument tokens. Each placeholder becomes the space-joined list of
/// target names, so one token may expand into several arguments.
pub fn expand_template(template: &str, targets: &[&CommandTarget]) -> Vec<String> {
    let full_names = targets
        .iter()
        .map(|t| t.full_name())
        .collect::<Vec<_>>()
        .join(" ");
    let node_names = targets
        .iter()
        .map(|t| t.node_name())
        .collect::<Vec<_>>()
        .join(" ");

    let expanded = template
        .replace(FULL_NAME_PLACEHOLDER, &full_names)
        .replace(NODE_NAME_PLACEHOLDER, &node_names);
    debug!(%template, %expanded, "expanded command template");

    expanded.split_whitespace().map(str::to_string).collect()
}

/// Substitute placeholders token by token for a single target. Tokens
/// keep their positions; only tokens that are exactly a placeholder are
/// replaced.
pub fn command_tokens(tokens: &[String], target: &CommandTarget) -> Vec<String> {
    tokens
        .iter()
        .map(|token| match token.as_str() {
            FULL_NAME_PLACEHOLDER => target.full_name().to_string(),
            NODE_NAME_PLACEHOLDER => target.node_name().to_string(),
            _ => token.clone(),
        })
        .collect()
}

/// Group targets by server, keeping first-seen server order.
pub(crate) fn group_by_server(targets: &[CommandTarget]) -> Vec<(&str, Vec<&CommandTarget>)> {
    let mut groups: Vec<(&str, Vec<&CommandTarget>)> = Vec::new();
    for target in targets {
        match groups.iter_mut().find(|(server, _)| *server == target.server) {
            Some((_, members)) => members.push(target),
            None => groups.push((target.server.as_str(), vec![target])),
        }
    }
    groups
}
