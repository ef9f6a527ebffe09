// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{ConfigFile, RawConfigFile, RawServerConfig, ServerConfig};
use crate::connection::Credential;
use crate::errors::{Result, SuitelinkError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SuitelinkError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let mut servers = BTreeMap::new();
        for (name, server) in raw.server {
            let checked = server_config(&name, server)?;
            servers.insert(name, checked);
        }

        Ok(ConfigFile::new_unchecked(raw.client, raw.commands, servers))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_servers(cfg)?;
    validate_client_section(cfg)?;
    validate_commands(cfg)?;
    Ok(())
}

fn config_error(message: impl Into<String>) -> SuitelinkError {
    SuitelinkError::ConfigError(message.into())
}

fn ensure_has_servers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.server.is_empty() {
        return Err(config_error(
            "config must contain at least one [server.<name>] section",
        ));
    }
    Ok(())
}

fn validate_client_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.client.timeout == 0 {
        return Err(config_error("[client].timeout must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    for (name, template) in cfg.commands.iter() {
        if template.trim().is_empty() {
            return Err(config_error(format!(
                "command '{name}' has an empty template"
            )));
        }
    }
    Ok(())
}

fn server_config(name: &str, raw: RawServerConfig) -> Result<ServerConfig> {
    if raw.host.trim().is_empty() {
        return Err(config_error(format!("server '{name}' has an empty host")));
    }
    if raw.port.parse::<u16>().is_err() {
        return Err(config_error(format!(
            "server '{name}' has an invalid port '{}'",
            raw.port
        )));
    }

    let credential = match (raw.user, raw.password, raw.token) {
        (Some(user), Some(password), None) => Credential::password(user, password),
        (None, None, Some(token)) => Credential::token(token),
        (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => {
            return Err(config_error(format!(
                "server '{name}' sets both a password and a token"
            )));
        }
        (None, Some(_), None) => {
            return Err(config_error(format!(
                "server '{name}' sets a password without a user"
            )));
        }
        (Some(_), None, None) => {
            return Err(config_error(format!(
                "server '{name}' sets a user without a password"
            )));
        }
        (None, None, None) => {
            return Err(config_error(format!(
                "server '{name}' needs either user + password or a token"
            )));
        }
    };

    Ok(ServerConfig {
        name: name.to_string(),
        host: raw.host,
        port: raw.port,
        credential,
        ssl: raw.ssl,
        refresh_interval: raw.refresh_interval,
        suite_filter: raw.suite_filter.unwrap_or_default(),
    })
}
