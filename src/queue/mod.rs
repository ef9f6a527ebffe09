// src/queue/mod.rs

//! Command queue: the serialization point between callers and one server.
//!
//! [`ComQueue`] is a pure state machine. It never performs IO; the session
//! asks it for the next task to dispatch with [`ComQueue::next_dispatch`],
//! hands that task to the worker in [`worker`], and reports back with
//! [`ComQueue::complete`]. At most one task is in flight at any time.

use std::collections::VecDeque;

use tracing::debug;

use crate::task::{PARAM_AUTO_ADD_NEW, Task, TaskKind, TaskRef};

pub mod worker;

pub use worker::{Completion, WorkerMessage, spawn_worker};

/// Error text stamped on tasks dropped by a reset.
pub const DISCARDED_BY_RESET: &str = "discarded by reset";
/// Error text stamped on tasks dropped because the queue was disabled.
pub const QUEUE_DISABLED: &str = "queue disabled";

/// Externally visible queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Dispatching,
    ResetState,
    Suspended,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Running,
    Suspended,
    Disabled,
}

#[derive(Debug)]
pub struct ComQueue {
    mode: Mode,
    /// Id of the outstanding reset task, if any.
    resetting: Option<u64>,
    pending: VecDeque<TaskRef>,
    in_flight: Option<TaskRef>,
}

impl Default for ComQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ComQueue {
    /// A new queue is suspended until the first reset.
    pub fn new() -> Self {
        Self {
            mode: Mode::Suspended,
            resetting: None,
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn state(&self) -> QueueState {
        match self.mode {
            Mode::Disabled => QueueState::Disabled,
            _ if self.resetting.is_some() => QueueState::ResetState,
            Mode::Suspended => QueueState::Suspended,
            Mode::Running if self.in_flight.is_some() => QueueState::Dispatching,
            Mode::Running => QueueState::Idle,
        }
    }

    pub fn is_resetting(&self) -> bool {
        self.resetting.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> Option<&TaskRef> {
        self.in_flight.as_ref()
    }

    /// Enqueue a task. Returns `false` (and marks the task rejected) when
    /// the queue is disabled, or when a reset is outstanding and the task is
    /// not part of the reset family.
    pub fn add_task(&mut self, task: TaskRef) -> bool {
        if self.mode == Mode::Disabled {
            debug!(task = task.id(), kind = %task.kind(), "queue disabled; task rejected");
            task.reject(QUEUE_DISABLED);
            return false;
        }
        if self.resetting.is_some() && !task.kind().is_reset_family() {
            debug!(task = task.id(), kind = %task.kind(), "reset outstanding; task rejected");
            task.reject("reset in progress");
            return false;
        }
        self.pending.push_back(task);
        true
    }

    pub fn add_news_task(&mut self) -> Option<TaskRef> {
        self.add_new(Task::new(TaskKind::News))
    }

    pub fn add_sync_task(&mut self) -> Option<TaskRef> {
        self.add_new(Task::new(TaskKind::Sync))
    }

    pub fn add_suite_list_task(&mut self) -> Option<TaskRef> {
        self.add_new(Task::new(TaskKind::SuiteList))
    }

    pub fn add_suite_auto_register_task(&mut self, auto_add_new: bool) -> Option<TaskRef> {
        let task = Task::new(TaskKind::SuiteAutoRegister);
        task.set_param(PARAM_AUTO_ADD_NEW, if auto_add_new { "1" } else { "0" });
        self.add_new(task)
    }

    fn add_new(&mut self, task: TaskRef) -> Option<TaskRef> {
        self.add_task(task.clone()).then_some(task)
    }

    /// Pause dispatch. Queued tasks are kept; an in-flight task runs on.
    pub fn suspend(&mut self) {
        if self.mode == Mode::Running {
            self.mode = Mode::Suspended;
        }
    }

    /// Resume dispatch after [`ComQueue::suspend`].
    pub fn start(&mut self) {
        if self.mode == Mode::Suspended {
            self.mode = Mode::Running;
        }
    }

    pub fn enable(&mut self) {
        if self.mode == Mode::Disabled {
            self.mode = Mode::Running;
        }
    }

    /// Stop accepting and dispatching tasks. Pending tasks are aborted.
    pub fn disable(&mut self) {
        self.mode = Mode::Disabled;
        self.abort_pending(QUEUE_DISABLED);
        let reset_in_flight = match (&self.in_flight, self.resetting) {
            (Some(task), Some(id)) => task.id() == id,
            _ => false,
        };
        if !reset_in_flight {
            self.resetting = None;
        }
    }

    /// Drop every pending task and make `task` the sole next dispatch.
    ///
    /// Further `add_task` calls are rejected until `task` completes.
    pub fn reset(&mut self, task: TaskRef) -> bool {
        if self.mode == Mode::Disabled {
            task.reject(QUEUE_DISABLED);
            return false;
        }
        let dropped = self.abort_pending(DISCARDED_BY_RESET);
        if dropped > 0 {
            debug!(dropped, "pending tasks discarded by reset");
        }
        self.resetting = Some(task.id());
        self.pending.push_back(task);
        self.mode = Mode::Running;
        true
    }

    /// Next task to hand to the worker, if dispatch is allowed now.
    pub fn next_dispatch(&mut self) -> Option<TaskRef> {
        if self.mode != Mode::Running || self.in_flight.is_some() {
            return None;
        }
        while let Some(task) = self.pending.pop_front() {
            if task.status().is_terminal() {
                continue;
            }
            task.mark_submitted();
            self.in_flight = Some(task.clone());
            return Some(task);
        }
        None
    }

    /// Record that `task` came back from the worker. Returns `false` if it
    /// was not the in-flight task.
    pub fn complete(&mut self, task: &TaskRef) -> bool {
        match &self.in_flight {
            Some(current) if current.id() == task.id() => {
                self.in_flight = None;
                if self.resetting == Some(task.id()) {
                    self.resetting = None;
                }
                true
            }
            _ => false,
        }
    }

    fn abort_pending(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for task in self.pending.drain(..) {
            task.abort(reason);
        }
        count
    }
}
