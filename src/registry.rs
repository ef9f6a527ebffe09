// src/registry.rs

//! Explicit registry of running server sessions.
//!
//! The registry owns one [`SessionHandle`] and the join handle of its
//! runtime task per server name, plus the named [`CommandRegistry`] shared
//! by every session.

use std::collections::BTreeMap;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::command::{CommandRegistry, CommandTarget, expand_template, group_by_server};
use crate::config::{ClientSection, ConfigFile, ServerConfig};
use crate::connection::{ConnectionHandle, ServerBackend};
use crate::errors::{Result, SuitelinkError};
use crate::session::{SessionHandle, SessionOptions, spawn_session};
use crate::task::TaskRef;

struct Entry {
    handle: SessionHandle,
    join: JoinHandle<Result<()>>,
}

#[derive(Default)]
pub struct ServerRegistry {
    servers: BTreeMap<String, Entry>,
    commands: CommandRegistry,
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.servers.keys().collect::<Vec<_>>())
            .field("commands", &self.commands)
            .finish()
    }
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands(commands: CommandRegistry) -> Self {
        Self {
            servers: BTreeMap::new(),
            commands,
        }
    }

    /// Spawn a session for every configured server. Must be called inside
    /// a tokio runtime.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::with_commands(CommandRegistry::from_map(cfg.commands.clone()));
        for server in cfg.servers.values() {
            registry.add_configured(server, &cfg.client)?;
        }
        Ok(registry)
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut CommandRegistry {
        &mut self.commands
    }

    /// Spawn a session talking to `backend`. The session starts with a
    /// reset right away.
    pub fn add_server<B>(&mut self, options: SessionOptions, backend: B) -> Result<SessionHandle>
    where
        B: ServerBackend + 'static,
    {
        if self.servers.contains_key(&options.name) {
            return Err(SuitelinkError::ConfigError(format!(
                "server '{}' is already registered",
                options.name
            )));
        }

        let name = options.name.clone();
        info!(server = %name, address = %options.long_name(), "adding server");
        let (handle, join) = spawn_session(options, backend);
        self.servers.insert(
            name,
            Entry {
                handle: handle.clone(),
                join,
            },
        );
        Ok(handle)
    }

    /// Spawn a session backed by a real [`ConnectionHandle`].
    pub fn add_configured(
        &mut self,
        server: &ServerConfig,
        client: &ClientSection,
    ) -> Result<SessionHandle> {
        let connection =
            ConnectionHandle::new(server.connection_config(client), server.credential.clone());
        self.add_server(server.session_options(client), connection)
    }

    pub fn find(&self, name: &str) -> Option<&SessionHandle> {
        self.servers.get(name).map(|entry| &entry.handle)
    }

    fn require(&self, name: &str) -> Result<&SessionHandle> {
        self.find(name)
            .ok_or_else(|| SuitelinkError::ServerNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Ordered shutdown of one session, then forget it.
    pub async fn remove_server(&mut self, name: &str) -> Result<()> {
        let entry = self
            .servers
            .remove(name)
            .ok_or_else(|| SuitelinkError::ServerNotFound(name.to_string()))?;
        info!(server = %name, "removing server");
        shutdown_entry(name, entry).await
    }

    /// Poll every server for news now and restart its refresh timer.
    pub async fn update_all(&self) -> Result<()> {
        for (name, entry) in self.servers.iter() {
            if let Err(err) = entry.handle.refresh().await {
                warn!(server = %name, error = %err, "update skipped");
            }
        }
        Ok(())
    }

    /// Send one command to a set of targets.
    ///
    /// With `resolve`, `name_or_command` is looked up in the command
    /// registry first. Targets are grouped by server and every server gets
    /// one command with its own targets substituted for the placeholders.
    /// Servers that are disconnected create no task.
    pub async fn command(
        &self,
        targets: &[CommandTarget],
        name_or_command: &str,
        resolve: bool,
    ) -> Result<Vec<TaskRef>> {
        let template = if resolve {
            self.commands.resolve(name_or_command)?
        } else {
            name_or_command
        };

        let mut tasks = Vec::new();
        for (server, members) in group_by_server(targets) {
            let handle = self.require(server)?;
            let args = expand_template(template, &members);
            if args.is_empty() {
                warn!(server = %server, command = %name_or_command, "command expanded to nothing");
                continue;
            }
            match handle.run_command(args).await? {
                Some(task) => tasks.push(task),
                None => warn!(server = %server, "server is disconnected; command not queued"),
            }
        }
        Ok(tasks)
    }

    /// Ordered shutdown of every session.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        let servers = std::mem::take(&mut self.servers);
        let mut first_err = None;
        for (name, entry) in servers {
            if let Err(err) = shutdown_entry(&name, entry).await {
                warn!(server = %name, error = %err, "session ended with error");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn shutdown_entry(name: &str, entry: Entry) -> Result<()> {
    entry.handle.shutdown().await?;
    match entry.join.await {
        Ok(result) => result,
        Err(err) => Err(SuitelinkError::Other(anyhow::anyhow!(
            "session '{name}' task failed: {err}"
        ))),
    }
}
