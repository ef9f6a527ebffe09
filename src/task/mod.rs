// src/task/mod.rs

//! A unit of work: one outstanding request to one server.
//!
//! Tasks are shared between the caller that created them and the session
//! that runs them ([`TaskRef`]). The status moves
//! `Pending -> Submitted -> {Finished | Aborted | Rejected}` and never
//! changes again once terminal; callers wait on that transition with
//! [`Task::wait`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::connection::ConnectionError;
use crate::wire::{FileKind, Request, ServerErrorKind};

pub mod kind;

pub use kind::{FailureAction, KindProfile, SuccessAction, TaskKind};

/// Parameter holding the node path a task refers to.
pub const PARAM_PATH: &str = "path";
/// Parameter selecting which job file to fetch.
pub const PARAM_CLIENT_PAR: &str = "clientPar";
/// `"1"` when a submitted script creates an alias.
pub const PARAM_ALIAS: &str = "alias";
/// `"1"` when newly created suites are registered automatically.
pub const PARAM_AUTO_ADD_NEW: &str = "autoAddNew";

pub type TaskRef = Arc<Task>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Submitted,
    Finished,
    Aborted,
    Rejected,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Aborted | TaskStatus::Rejected
        )
    }
}

/// Result buffer filled when a task finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskResult {
    #[default]
    Empty,
    Text(String),
    Lines(Vec<String>),
}

#[derive(Debug, Default)]
struct Outcome {
    result: TaskResult,
    error: Option<String>,
}

#[derive(Debug)]
pub struct Task {
    id: u64,
    kind: TaskKind,
    /// Command tokens, script lines, or suite names depending on the kind.
    args: Vec<String>,
    params: Mutex<BTreeMap<String, String>>,
    outcome: Mutex<Outcome>,
    status: watch::Sender<TaskStatus>,
}

impl Task {
    pub fn new(kind: TaskKind) -> TaskRef {
        Self::with_args(kind, Vec::new())
    }

    pub fn with_args(kind: TaskKind, args: Vec<String>) -> TaskRef {
        let (status, _) = watch::channel(TaskStatus::Pending);
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            args,
            params: Mutex::new(BTreeMap::new()),
            outcome: Mutex::new(Outcome::default()),
            status,
        })
    }

    /// Command task from a flat token list, e.g. `["--begin", "/s1"]`.
    pub fn command(args: Vec<String>) -> TaskRef {
        Self::with_args(TaskKind::Command, args)
    }

    /// Data fetch addressed to a node (`Script`, `History`, `Stats`...).
    pub fn for_node(kind: TaskKind, path: impl Into<String>) -> TaskRef {
        let task = Self::new(kind);
        task.set_param(PARAM_PATH, path);
        task
    }

    pub fn script_submit(path: impl Into<String>, lines: Vec<String>, alias: bool) -> TaskRef {
        let task = Self::with_args(TaskKind::ScriptSubmit, lines);
        task.set_param(PARAM_PATH, path);
        task.set_param(PARAM_ALIAS, if alias { "1" } else { "0" });
        task
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.params.lock().get(name).cloned()
    }

    pub fn set_param(&self, name: &str, value: impl Into<String>) {
        self.params.lock().insert(name.to_string(), value.into());
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    pub fn result(&self) -> TaskResult {
        self.outcome.lock().result.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.outcome.lock().error.clone()
    }

    /// Reply text, or the lines joined with newlines.
    pub fn text(&self) -> String {
        match &self.outcome.lock().result {
            TaskResult::Empty => String::new(),
            TaskResult::Text(text) => text.clone(),
            TaskResult::Lines(lines) => lines.join("\n"),
        }
    }

    /// Wait until the task reaches a terminal status.
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            // The sender lives in `self`, so it cannot be gone while we borrow it.
            Err(_) => self.status(),
        }
    }

    pub(crate) fn mark_submitted(&self) -> bool {
        self.transition(TaskStatus::Submitted, |_| {})
    }

    pub(crate) fn finish(&self, result: TaskResult) -> bool {
        self.transition(TaskStatus::Finished, |o| o.result = result)
    }

    pub(crate) fn abort(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition(TaskStatus::Aborted, |o| o.error = Some(message))
    }

    pub(crate) fn reject(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition(TaskStatus::Rejected, |o| o.error = Some(message))
    }

    /// Single write point for status. Terminal status is final.
    fn transition(&self, to: TaskStatus, fill: impl FnOnce(&mut Outcome)) -> bool {
        let mut outcome = self.outcome.lock();
        let from = self.status();
        if from.is_terminal() {
            debug!(task = self.id, kind = %self.kind, ?from, ?to, "ignoring transition of finished task");
            return false;
        }
        fill(&mut outcome);
        self.status.send_replace(to);
        true
    }

    fn required_param(&self, name: &str) -> Result<String, ConnectionError> {
        self.param(name).ok_or_else(|| {
            ConnectionError::rejected(
                ServerErrorKind::InvalidArgument,
                format!("{} task is missing parameter '{name}'", self.kind),
            )
        })
    }

    /// Wire request for this task.
    pub fn request(&self) -> Result<Request, ConnectionError> {
        let request = match self.kind {
            TaskKind::Command => Request::Command {
                args: self.args.clone(),
            },
            TaskKind::News => Request::News,
            TaskKind::Sync => Request::Sync,
            TaskKind::Reset => Request::Reset {
                suites: self.args.clone(),
                auto_add_new: self.param(PARAM_AUTO_ADD_NEW).as_deref() == Some("1"),
            },
            TaskKind::Script | TaskKind::Job | TaskKind::Output | TaskKind::Manual => {
                let par = self.required_param(PARAM_CLIENT_PAR)?;
                let kind = FileKind::from_client_par(&par).ok_or_else(|| {
                    ConnectionError::rejected(
                        ServerErrorKind::InvalidArgument,
                        format!("unknown file kind '{par}'"),
                    )
                })?;
                Request::File {
                    path: self.required_param(PARAM_PATH)?,
                    kind,
                }
            }
            TaskKind::History => Request::History {
                path: self.required_param(PARAM_PATH)?,
            },
            TaskKind::Message => Request::Messages {
                path: self.required_param(PARAM_PATH)?,
            },
            TaskKind::Stats => Request::Stats,
            TaskKind::ScriptPreproc => Request::ScriptPreprocess {
                path: self.required_param(PARAM_PATH)?,
            },
            TaskKind::ScriptEdit => Request::ScriptEdit {
                path: self.required_param(PARAM_PATH)?,
            },
            TaskKind::ScriptSubmit => Request::ScriptSubmit {
                path: self.required_param(PARAM_PATH)?,
                lines: self.args.clone(),
                alias: self.param(PARAM_ALIAS).as_deref() == Some("1"),
            },
            TaskKind::SuiteList => Request::SuiteList,
            TaskKind::SuiteAutoRegister => Request::SuiteAutoRegister {
                auto_add_new: self.param(PARAM_AUTO_ADD_NEW).as_deref() == Some("1"),
            },
        };
        Ok(request)
    }
}
