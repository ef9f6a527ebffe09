// src/task/kind.rs

//! Task kinds and the table describing how each kind is routed and handled.
//!
//! Adding a kind means adding one variant and one row in [`TaskKind::profile`].

use std::fmt;

/// What a task asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Command,
    News,
    Sync,
    Reset,
    Script,
    Job,
    Output,
    Manual,
    History,
    Message,
    Stats,
    ScriptPreproc,
    ScriptEdit,
    ScriptSubmit,
    SuiteList,
    SuiteAutoRegister,
}

/// What the session does when a task of this kind succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessAction {
    /// Inspect the news flag: nothing, sync, or full reset.
    HandleNews,
    /// Patch or rescan the mirror, then refresh the suite list.
    HandleSync,
    /// Rebuild the mirror from the downloaded definition.
    ResetFinished,
    StoreText,
    StoreLines,
    /// Store the human-readable statistics report.
    StoreStats,
    /// Store the reply text and check for news (the server just changed).
    StoreTextThenNews,
    /// Record the server's suite list in the suite filter.
    UpdateLoadedSuites,
    Acknowledge,
}

/// What the session does when a task of this kind fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    ConnectionLost,
    ResetFailed,
    /// Report the failure on the task only.
    AbortTask,
}

/// One row of the kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    /// Whether callers may hand this kind to `run`.
    pub routable: bool,
    /// `clientPar` parameter stamped on routed file fetches.
    pub client_par: Option<&'static str>,
    pub on_success: SuccessAction,
    pub on_failure: FailureAction,
}

impl KindProfile {
    const fn internal(on_success: SuccessAction, on_failure: FailureAction) -> Self {
        Self {
            routable: false,
            client_par: None,
            on_success,
            on_failure,
        }
    }

    const fn routed(client_par: Option<&'static str>, on_success: SuccessAction) -> Self {
        Self {
            routable: true,
            client_par,
            on_success,
            on_failure: FailureAction::AbortTask,
        }
    }
}

impl TaskKind {
    pub fn profile(self) -> KindProfile {
        use FailureAction as F;
        use SuccessAction as S;

        match self {
            TaskKind::Command => KindProfile::internal(S::StoreTextThenNews, F::AbortTask),
            TaskKind::News => KindProfile::internal(S::HandleNews, F::ConnectionLost),
            TaskKind::Sync => KindProfile::internal(S::HandleSync, F::ConnectionLost),
            TaskKind::Reset => KindProfile::internal(S::ResetFinished, F::ResetFailed),
            TaskKind::SuiteList => KindProfile::internal(S::UpdateLoadedSuites, F::AbortTask),
            TaskKind::SuiteAutoRegister => KindProfile::internal(S::Acknowledge, F::AbortTask),
            TaskKind::Script => KindProfile::routed(Some("script"), S::StoreText),
            TaskKind::Job => KindProfile::routed(Some("job"), S::StoreText),
            TaskKind::Output => KindProfile::routed(Some("jobout"), S::StoreText),
            TaskKind::Manual => KindProfile::routed(Some("manual"), S::StoreText),
            TaskKind::History => KindProfile::routed(None, S::StoreText),
            TaskKind::Message => KindProfile::routed(None, S::StoreLines),
            TaskKind::Stats => KindProfile {
                on_failure: F::ConnectionLost,
                ..KindProfile::routed(None, S::StoreStats)
            },
            TaskKind::ScriptPreproc => KindProfile::routed(None, S::StoreText),
            TaskKind::ScriptEdit => KindProfile::routed(None, S::StoreText),
            TaskKind::ScriptSubmit => KindProfile::routed(None, S::StoreTextThenNews),
        }
    }

    /// Kinds the queue still accepts while a reset is outstanding.
    pub fn is_reset_family(self) -> bool {
        matches!(self, TaskKind::Reset)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
