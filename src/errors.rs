// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::mirror::MirrorError;

#[derive(Error, Debug)]
pub enum SuitelinkError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Command not registered: {0}")]
    CommandNotFound(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Internal error: {0}")]
    Internal(#[from] MirrorError),

    #[error("Session '{0}' is closed")]
    SessionClosed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SuitelinkError>;
