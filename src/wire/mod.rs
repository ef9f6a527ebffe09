// src/wire/mod.rs

//! Request/reply types exchanged with the workflow server.
//!
//! The transport is JSON lines: the client writes one [`Envelope`] per
//! connection and reads back one [`ServerReply`].

use serde::{Deserialize, Serialize};

use crate::connection::Credential;
use crate::defs::{Defs, NodeUpdate};

/// Which job-related file to fetch for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Script,
    Job,
    Jobout,
    Manual,
}

impl FileKind {
    /// Value of the `clientPar` task parameter for this file kind.
    pub fn client_par(self) -> &'static str {
        match self {
            FileKind::Script => "script",
            FileKind::Job => "job",
            FileKind::Jobout => "jobout",
            FileKind::Manual => "manual",
        }
    }

    pub fn from_client_par(par: &str) -> Option<Self> {
        match par {
            "script" => Some(FileKind::Script),
            "job" => Some(FileKind::Job),
            "jobout" => Some(FileKind::Jobout),
            "manual" => Some(FileKind::Manual),
            _ => None,
        }
    }
}

/// One request to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Has anything changed since the cursor?
    News,
    /// Send the changes since the cursor.
    Sync,
    /// Register (or re-register) and download the full definition.
    Reset { suites: Vec<String>, auto_add_new: bool },
    /// A user command, as a flat token list (`["--begin", "/s1"]`).
    Command { args: Vec<String> },
    File { path: String, kind: FileKind },
    History { path: String },
    Messages { path: String },
    Stats,
    ScriptPreprocess { path: String },
    ScriptEdit { path: String },
    ScriptSubmit { path: String, lines: Vec<String>, alias: bool },
    SuiteList,
    SuiteAutoRegister { auto_add_new: bool },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::News => "news",
            Request::Sync => "sync",
            Request::Reset { .. } => "reset",
            Request::Command { .. } => "command",
            Request::File { .. } => "file",
            Request::History { .. } => "history",
            Request::Messages { .. } => "messages",
            Request::Stats => "stats",
            Request::ScriptPreprocess { .. } => "script_preprocess",
            Request::ScriptEdit { .. } => "script_edit",
            Request::ScriptSubmit { .. } => "script_submit",
            Request::SuiteList => "suite_list",
            Request::SuiteAutoRegister { .. } => "suite_auto_register",
        }
    }
}

/// Per-connection synchronisation point.
///
/// The server hands out a `client_handle` on reset and bumps the change
/// numbers on every reply; the client echoes them back so the server can
/// compute what changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub client_handle: u64,
    pub state_change_no: u64,
    pub modify_change_no: u64,
}

/// What goes on the wire for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub auth: Credential,
    pub cursor: SyncCursor,
    pub request: Request,
}

/// Answer to a news poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum News {
    NoNews,
    News,
    DoFullSync,
}

/// Error class reported by the server. Replaces guessing from message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorKind {
    AuthenticationFailed,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    Internal,
}

impl ServerErrorKind {
    /// HTTP status an HTTP front end should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ServerErrorKind::AuthenticationFailed => 401,
            ServerErrorKind::NotFound => 404,
            ServerErrorKind::AlreadyExists => 409,
            ServerErrorKind::InvalidArgument => 400,
            ServerErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub message: String,
}

/// Server statistics (answer to [`Request::Stats`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime_secs: u64,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub job_count: u64,
}

impl Stats {
    /// Human-readable report, one `key: value` per line.
    pub fn show(&self) -> String {
        format!(
            "version: {}\nuptime: {}s\nrequests: {}\njobs: {}\n",
            self.version, self.uptime_secs, self.request_count, self.job_count
        )
    }
}

/// Reply to any request. Fields not relevant to a request stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerReply {
    #[serde(default)]
    pub news: Option<News>,
    #[serde(default)]
    pub full_sync: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lines: Vec<String>,
    /// Full definition (reset, or sync with `full_sync`).
    #[serde(default)]
    pub defs: Option<Defs>,
    #[serde(default)]
    pub changes: Vec<NodeUpdate>,
    #[serde(default)]
    pub stats: Option<Stats>,
    #[serde(default)]
    pub cursor: Option<SyncCursor>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

impl ServerReply {
    pub fn news(news: News) -> Self {
        Self {
            news: Some(news),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn defs(defs: Defs) -> Self {
        Self {
            defs: Some(defs),
            ..Self::default()
        }
    }

    pub fn changes(changes: Vec<NodeUpdate>) -> Self {
        Self {
            changes,
            ..Self::default()
        }
    }

    pub fn error(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(ServerError {
                kind,
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    pub fn with_full_sync(mut self, full_sync: bool) -> Self {
        self.full_sync = full_sync;
        self
    }

    pub fn with_cursor(mut self, cursor: SyncCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn get_news(&self) -> Option<News> {
        self.news
    }

    pub fn full_sync(&self) -> bool {
        self.full_sync
    }

    pub fn get_string(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn get_string_vec(&self) -> &[String] {
        &self.lines
    }

    pub fn stats(&self) -> Option<&Stats> {
        self.stats.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_tagged_by_type() {
        let json = serde_json::to_string(&Request::Command {
            args: vec!["--begin".into(), "/s1".into()],
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"command","args":["--begin","/s1"]}"#);
    }

    #[test]
    fn sparse_reply_uses_defaults() {
        let reply: ServerReply = serde_json::from_str(r#"{"news":"do_full_sync"}"#).unwrap();
        assert_eq!(reply.get_news(), Some(News::DoFullSync));
        assert!(!reply.full_sync());
        assert_eq!(reply.get_string(), "");
        assert!(reply.changes.is_empty());
    }

    #[test]
    fn error_kinds_map_to_http_status() {
        assert_eq!(ServerErrorKind::AuthenticationFailed.http_status(), 401);
        assert_eq!(ServerErrorKind::AlreadyExists.http_status(), 409);
        assert_eq!(ServerErrorKind::NotFound.http_status(), 404);
    }
}
