// src/session/mod.rs

//! Per-server session.
//!
//! The session is split the same way as the rest of the crate's runtime
//! code:
//! - [`core::SessionCore`] is a synchronous state machine. It owns the
//!   command queue, the definition copy, the local mirror, the suite filter
//!   and the observers, and answers every input with [`SessionCommand`]s.
//! - [`handlers`] holds the completion handlers (what happens when a task
//!   succeeds or fails).
//! - [`runtime`] is the async shell: it owns the refresh timer and the
//!   dispatch worker, and feeds requests and completions into the core one
//!   at a time.

use std::time::Duration;

use crate::task::TaskRef;
use crate::types::{Activity, ConnectState, NodeState, ServerRunState};

pub mod core;
pub mod handlers;
pub mod runtime;
pub mod suite_filter;

pub use self::core::SessionCore;
pub use runtime::{SessionHandle, SessionRequest, SessionRuntime, spawn_session};
pub use suite_filter::{ChangeFlags, SuiteFilter};
pub use crate::queue::QueueState;

/// Identity and polling settings of one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub name: String,
    pub host: String,
    pub port: String,
    /// `None` disables periodic news polling.
    pub refresh_interval: Option<Duration>,
    pub suite_filter: SuiteFilter,
}

impl SessionOptions {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: port.into(),
            refresh_interval: Some(Duration::from_secs(60)),
            suite_filter: SuiteFilter::default(),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_suite_filter(mut self, filter: SuiteFilter) -> Self {
        self.suite_filter = filter;
        self
    }

    /// `host@port`, used in logs.
    pub fn long_name(&self) -> String {
        format!("{}@{}", self.host, self.port)
    }
}

/// Command produced by the core, executed by the runtime.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Hand this task to the dispatch worker.
    Dispatch(TaskRef),
    /// (Re)start the refresh timer with this period.
    StartTimer(Duration),
    StopTimer,
}

/// Everything the runtime has to do after one input.
#[derive(Debug, Clone)]
pub struct SessionStep {
    pub commands: Vec<SessionCommand>,
    /// False once the session has shut down.
    pub keep_running: bool,
}

/// Read-only view of a session, for callers outside the session task.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub name: String,
    pub host: String,
    pub port: String,
    pub connect_state: ConnectState,
    pub connect_error: Option<String>,
    pub activity: Activity,
    pub queue_state: QueueState,
    pub server_state: ServerRunState,
    pub node_state: NodeState,
    pub suspended: bool,
    pub mirrored_suites: Vec<String>,
    pub mirrored_nodes: usize,
    pub suite_filter: SuiteFilter,
    pub timer_running: bool,
}
