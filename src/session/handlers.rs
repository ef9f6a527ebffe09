// src/session/handlers.rs

//! Completion handling: what the session does when a task comes back.
//!
//! The per-kind behaviour comes from [`TaskKind::profile`]; this module only
//! implements each [`SuccessAction`] and [`FailureAction`] once.

use tracing::{debug, warn};

use crate::connection::ConnectionError;
use crate::queue::Completion;
use crate::task::{FailureAction, SuccessAction, TaskKind, TaskRef, TaskResult};
use crate::types::{Activity, ConnectState};
use crate::wire::{News, ServerReply};

use super::SessionCore;

impl SessionCore {
    /// Handle the outcome of the in-flight task.
    pub fn task_completed(&mut self, completion: Completion) {
        let Completion { task, outcome } = completion;

        if !self.queue.complete(&task) {
            warn!(server = %self.options.name, task = task.id(), "completion for a task that was not in flight");
        }

        let superseded = self.queue.is_resetting() && task.kind() != TaskKind::Reset;
        if superseded || self.shutting_down || self.connect_state == ConnectState::Disconnected {
            // The outcome no longer drives the session; only the caller sees it.
            debug!(server = %self.options.name, task = task.id(), kind = %task.kind(), "completion recorded on task only");
            match outcome {
                Ok(reply) => {
                    task.finish(stored_result(task.kind().profile().on_success, &reply));
                }
                Err(err) => {
                    task.abort(err.to_string());
                }
            }
            if task.kind() == TaskKind::Reset && self.activity == Activity::LoadActivity {
                // The dropped reply leaves the mirror empty; reconnecting reloads it.
                self.set_activity(Activity::NoActivity);
            }
            self.finish_shutdown_if_idle();
            return;
        }

        match outcome {
            Ok(reply) => self.task_succeeded(&task, reply),
            Err(err) => self.task_failed(&task, &err),
        }
    }

    fn task_succeeded(&mut self, task: &TaskRef, reply: ServerReply) {
        let action = task.kind().profile().on_success;
        debug!(server = %self.options.name, task = task.id(), kind = %task.kind(), ?action, "task finished");

        match action {
            SuccessAction::HandleNews => {
                task.finish(TaskResult::Empty);
                self.handle_news(reply.get_news());
            }
            SuccessAction::HandleSync => {
                self.apply_sync(&reply);
                task.finish(TaskResult::Empty);
                if reply.full_sync() || self.mirror.is_empty() {
                    debug!(server = %self.options.name, "full sync requested - rescan tree");
                    if let Err(err) = self.rescan_tree() {
                        warn!(server = %self.options.name, error = %err, "rescan after sync inconsistent");
                    }
                }
                self.queue.add_suite_list_task();
            }
            SuccessAction::ResetFinished => {
                self.defs = reply.defs.unwrap_or_default();
                match self.reset_finished() {
                    Ok(()) => {
                        task.finish(TaskResult::Empty);
                    }
                    Err(err) => {
                        task.abort(format!("internal error: {err}"));
                    }
                }
                self.queue.add_suite_list_task();
            }
            SuccessAction::StoreTextThenNews => {
                task.finish(stored_result(action, &reply));
                // The server just changed; look for the updates.
                self.queue.add_news_task();
            }
            SuccessAction::UpdateLoadedSuites => {
                self.update_loaded_suites(reply.get_string_vec());
                task.finish(stored_result(action, &reply));
            }
            SuccessAction::StoreText
            | SuccessAction::StoreLines
            | SuccessAction::StoreStats
            | SuccessAction::Acknowledge => {
                task.finish(stored_result(action, &reply));
            }
        }
    }

    fn task_failed(&mut self, task: &TaskRef, err: &ConnectionError) {
        let action = task.kind().profile().on_failure;
        let message = err.to_string();
        debug!(server = %self.options.name, task = task.id(), kind = %task.kind(), ?action, error = %message, "task failed");

        task.abort(message.clone());
        match action {
            FailureAction::ConnectionLost => self.connection_lost(&message),
            FailureAction::ResetFailed => self.reset_failed(&message),
            FailureAction::AbortTask => {
                if err.is_connection_level() {
                    self.connection_lost(&message);
                }
            }
        }
    }

    fn handle_news(&mut self, news: Option<News>) {
        match news {
            Some(News::NoNews) => {
                debug!(server = %self.options.name, "no news from server");
                self.connection_gained();
            }
            Some(News::News) => {
                debug!(server = %self.options.name, "news from server - send sync");
                self.connection_gained();
                self.queue.add_sync_task();
            }
            Some(News::DoFullSync) => {
                debug!(server = %self.options.name, "full sync requested by server - reset");
                self.connection_gained();
                self.reset();
            }
            None => {
                warn!(server = %self.options.name, "news reply without news flag");
                self.connection_gained();
            }
        }
    }

    /// Fold a sync reply into the definition and route each change.
    pub fn apply_sync(&mut self, reply: &ServerReply) {
        if reply.full_sync() {
            if let Some(defs) = &reply.defs {
                self.defs = defs.clone();
                self.stamp_server();
            }
        }

        for update in &reply.changes {
            if !self.defs.apply(update) && !update.is_structural() {
                debug!(server = %self.options.name, path = %update.path, "change for node missing from definition");
            }
            if let Err(err) = self.node_changed(update) {
                // The mirror no longer matches the definition; rebuild it.
                warn!(server = %self.options.name, error = %err, "mirror update failed - clearing tree");
                self.clear_tree();
            }
        }
    }
}

/// What a finished task keeps for its caller.
fn stored_result(action: SuccessAction, reply: &ServerReply) -> TaskResult {
    match action {
        SuccessAction::StoreText | SuccessAction::StoreTextThenNews => {
            TaskResult::Text(reply.get_string().to_string())
        }
        SuccessAction::StoreLines | SuccessAction::UpdateLoadedSuites => {
            TaskResult::Lines(reply.get_string_vec().to_vec())
        }
        SuccessAction::StoreStats => {
            TaskResult::Text(reply.stats().map(|s| s.show()).unwrap_or_default())
        }
        SuccessAction::HandleNews
        | SuccessAction::HandleSync
        | SuccessAction::ResetFinished
        | SuccessAction::Acknowledge => TaskResult::Empty,
    }
}
