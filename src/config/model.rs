// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::connection::{ConnectionConfig, Credential};
use crate::session::{SessionOptions, SuiteFilter};

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [client]
/// refresh_interval = 60
/// retry_period = 1
/// timeout = 30
///
/// [commands]
/// suspend = "--suspend <full_name>"
///
/// [server.main]
/// host = "localhost"
/// port = "3141"
/// user = "ops"
/// password = "secret"
///
/// [server.main.suite_filter]
/// enabled = true
/// suites = ["s1"]
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub client: ClientSection,

    /// Named command templates from `[commands]`.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,

    /// All servers from `[server.<name>]`.
    #[serde(default)]
    pub server: BTreeMap<String, RawServerConfig>,
}

/// `[client]` section: settings shared by every session.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    /// Seconds between news polls. `0` disables polling.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Seconds to wait after a failed attempt before the next one.
    #[serde(default = "default_retry_period")]
    pub retry_period: u64,

    /// Client-side timeout for one request, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_retry_period() -> u64 {
    1
}

fn default_timeout() -> u64 {
    30
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            retry_period: default_retry_period(),
            timeout: default_timeout(),
        }
    }
}

/// `[server.<name>]` section as written by the user.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawServerConfig {
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    /// Overrides `[client].refresh_interval` for this server.
    #[serde(default)]
    pub refresh_interval: Option<u64>,
    #[serde(default)]
    pub suite_filter: Option<SuiteFilter>,
}

/// Validated server entry.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: String,
    pub credential: Credential,
    pub ssl: bool,
    pub refresh_interval: Option<u64>,
    pub suite_filter: SuiteFilter,
}

impl ServerConfig {
    pub fn session_options(&self, client: &ClientSection) -> SessionOptions {
        let secs = self.refresh_interval.unwrap_or(client.refresh_interval);
        let interval = (secs > 0).then(|| Duration::from_secs(secs));
        SessionOptions::new(&self.name, &self.host, &self.port)
            .with_refresh_interval(interval)
            .with_suite_filter(self.suite_filter.clone())
    }

    pub fn connection_config(&self, client: &ClientSection) -> ConnectionConfig {
        ConnectionConfig::new(&self.host, &self.port)
            .with_ssl(self.ssl)
            .with_timeout(Duration::from_secs(client.timeout))
            .with_retry_period(Duration::from_secs(client.retry_period))
            .with_throw_on_error(true)
    }
}

/// Validated configuration. Built from [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub client: ClientSection,
    pub commands: BTreeMap<String, String>,
    pub servers: BTreeMap<String, ServerConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        client: ClientSection,
        commands: BTreeMap<String, String>,
        servers: BTreeMap<String, ServerConfig>,
    ) -> Self {
        Self {
            client,
            commands,
            servers,
        }
    }
}
