// src/session/core.rs

//! Pure session state machine.
//!
//! `SessionCore` never touches a socket, a timer or a channel. Every
//! operation mutates its state, broadcasts notifications to the observers,
//! and records [`SessionCommand`]s that the runtime collects with
//! [`SessionCore::take_step`]. The runtime calls the core from a single
//! task, so each handler runs to completion before the next input.

use std::mem;

use tracing::{debug, error, info};

use crate::defs::{Defs, NAME_IN_VIEWER_VAR, NodeUpdate};
use crate::mirror::{LocalMirror, MirrorError, NodeChange, ServerChange};
use crate::observer::{ObserverId, ObserverList, SessionEvent, SessionObserver};
use crate::queue::{ComQueue, QueueState};
use crate::task::{PARAM_AUTO_ADD_NEW, PARAM_CLIENT_PAR, Task, TaskKind, TaskRef};
use crate::types::{Activity, ConnectState, NodeState, ServerRunState};

use super::{SessionCommand, SessionOptions, SessionSnapshot, SessionStep, SuiteFilter};

#[derive(Debug)]
pub struct SessionCore {
    pub(super) options: SessionOptions,
    pub(super) connect_state: ConnectState,
    pub(super) connect_error: Option<String>,
    pub(super) activity: Activity,
    pub(super) queue: ComQueue,
    pub(super) defs: Defs,
    pub(super) mirror: LocalMirror,
    pub(super) suite_filter: SuiteFilter,
    pub(super) observers: ObserverList,
    pub(super) timer_running: bool,
    pub(super) shutting_down: bool,
    pub(super) deleted: bool,
    pub(super) commands: Vec<SessionCommand>,
}

impl SessionCore {
    /// A new session is `Lost` with a suspended queue. Call
    /// [`SessionCore::reset`] to load the definition.
    pub fn new(mut options: SessionOptions) -> Self {
        let suite_filter = mem::take(&mut options.suite_filter);
        Self {
            options,
            connect_state: ConnectState::default(),
            connect_error: None,
            activity: Activity::default(),
            queue: ComQueue::new(),
            defs: Defs::default(),
            mirror: LocalMirror::new(),
            suite_filter,
            observers: ObserverList::default(),
            timer_running: false,
            shutting_down: false,
            deleted: false,
            commands: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn connect_state(&self) -> ConnectState {
        self.connect_state
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    pub fn defs(&self) -> &Defs {
        &self.defs
    }

    pub fn suite_filter(&self) -> &SuiteFilter {
        &self.suite_filter
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Collect the commands accumulated since the last step, plus the next
    /// dispatch if the queue allows one.
    pub fn take_step(&mut self) -> SessionStep {
        if let Some(task) = self.queue.next_dispatch() {
            debug!(server = %self.options.name, task = task.id(), kind = %task.kind(), "task submitted");
            self.commands.push(SessionCommand::Dispatch(task));
        }
        SessionStep {
            commands: mem::take(&mut self.commands),
            keep_running: !self.deleted,
        }
    }

    // ---- observers ---------------------------------------------------

    pub fn subscribe(&mut self, observer: Box<dyn SessionObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    pub(super) fn broadcast(&mut self, event: SessionEvent) {
        self.observers
            .broadcast(&self.options.name, &event, &self.mirror);
    }

    // ---- caller operations -------------------------------------------

    /// Queue a command. Does nothing (and creates no task) while
    /// disconnected.
    pub fn run_command(&mut self, args: Vec<String>) -> Option<TaskRef> {
        if self.connect_state == ConnectState::Disconnected {
            debug!(server = %self.options.name, "disconnected; command not sent");
            return None;
        }
        debug!(server = %self.options.name, command = %args.join(" "), "run command");
        let task = Task::command(args);
        self.queue.add_task(task.clone());
        Some(task)
    }

    /// Route a caller-created data fetch.
    pub fn run(&mut self, task: TaskRef) {
        if self.connect_state == ConnectState::Disconnected {
            task.reject("server disconnected");
            return;
        }
        let profile = task.kind().profile();
        if !profile.routable {
            debug!(server = %self.options.name, kind = %task.kind(), "task kind cannot be run directly");
            task.reject(format!("{} tasks cannot be run directly", task.kind()));
            return;
        }
        if let Some(par) = profile.client_par {
            task.set_param(PARAM_CLIENT_PAR, par);
        }
        self.queue.add_task(task);
    }

    /// Ask the server for news.
    pub fn update(&mut self) -> Option<TaskRef> {
        if self.connect_state == ConnectState::Disconnected {
            return None;
        }
        self.queue.add_news_task()
    }

    /// Periodic timer fired.
    pub fn refresh_tick(&mut self) {
        debug!(server = %self.options.name, "auto refreshing server info");
        self.update();
    }

    /// Immediate refresh that also restarts the timer, so the next periodic
    /// poll does not follow right behind.
    pub fn refresh(&mut self) {
        self.update();
        self.reset_refresh_timer();
    }

    // ---- timer -------------------------------------------------------

    pub(super) fn reset_refresh_timer(&mut self) {
        if self.connect_state == ConnectState::Disconnected || self.shutting_down {
            return;
        }
        match self.options.refresh_interval {
            Some(interval) => {
                self.commands.push(SessionCommand::StartTimer(interval));
                self.timer_running = true;
            }
            None => self.stop_refresh_timer(),
        }
    }

    pub(super) fn stop_refresh_timer(&mut self) {
        if self.timer_running {
            self.commands.push(SessionCommand::StopTimer);
            self.timer_running = false;
        }
    }

    pub(super) fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
        self.broadcast(SessionEvent::ActivityChanged(activity));
    }

    // ---- reset / rescan ----------------------------------------------

    /// Drop everything and reload the definition from the server.
    pub fn reset(&mut self) {
        if self.queue.state() == QueueState::ResetState {
            debug!(server = %self.options.name, "skip reset - it is already running");
            return;
        }
        if self.connect_state == ConnectState::Disconnected || self.shutting_down {
            debug!(server = %self.options.name, "skip reset - session not connected");
            return;
        }

        info!(server = %self.options.name, address = %self.options.long_name(), "resetting");

        self.stop_refresh_timer();
        self.queue.suspend();
        self.clear_tree();

        self.set_activity(Activity::LoadActivity);

        let task = Task::with_args(TaskKind::Reset, self.suite_filter.registered_suites());
        task.set_param(
            PARAM_AUTO_ADD_NEW,
            if self.suite_filter.auto_add_new { "1" } else { "0" },
        );
        self.queue.reset(task);
    }

    /// The reset task succeeded and `self.defs` holds the new definition.
    pub fn reset_finished(&mut self) -> Result<(), MirrorError> {
        self.set_activity(Activity::NoActivity);
        self.stamp_server();

        let result = self.scan();

        self.connection_gained();
        self.reset_refresh_timer();
        result
    }

    /// Record where the definition came from: the endpoint and the name
    /// this client shows it under.
    pub(super) fn stamp_server(&mut self) {
        self.defs.server.host_port = Some((self.options.host.clone(), self.options.port.clone()));
        self.defs
            .server
            .add_or_update_user_variable(NAME_IN_VIEWER_VAR, &self.options.name);
    }

    /// The reset task failed: the server may be down, unreachable, or
    /// refuse the credential.
    pub fn reset_failed(&mut self, message: &str) {
        self.connect_state = ConnectState::Lost;
        self.connect_error = Some(message.to_string());
        self.set_activity(Activity::NoActivity);

        self.broadcast(SessionEvent::ConnectStateChanged {
            state: ConnectState::Lost,
            error: Some(message.to_string()),
        });

        // A later news poll may still recover the connection.
        self.reset_refresh_timer();
    }

    /// Rebuild the mirror from the current definition.
    pub fn rescan_tree(&mut self) -> Result<(), MirrorError> {
        debug!(server = %self.options.name, "rescan tree");
        self.set_activity(Activity::RescanActivity);

        self.stop_refresh_timer();
        self.queue.suspend();
        self.clear_tree();

        let result = self.scan();

        self.queue.start();
        self.reset_refresh_timer();
        self.set_activity(Activity::NoActivity);
        result
    }

    /// Empty the mirror, bracketed by clear notifications.
    pub fn clear_tree(&mut self) {
        if !self.mirror.is_empty() {
            self.broadcast(SessionEvent::ServerClearBegin);
            self.mirror.clear();
            self.broadcast(SessionEvent::ServerClearEnd);
        }
    }

    fn scan(&mut self) -> Result<(), MirrorError> {
        let mut change = ServerChange::default();
        self.mirror
            .begin_scan(&self.defs, &self.suite_filter, &mut change);
        self.broadcast(SessionEvent::ServerScanBegin(change));

        self.mirror.end_scan();
        let checked = self.mirror.check_scan(&change);
        if let Err(err) = &checked {
            error!(server = %self.options.name, error = %err, "mirror scan inconsistent");
        }

        self.broadcast(SessionEvent::ServerScanEnd);
        checked
    }

    // ---- sync --------------------------------------------------------

    /// Route one incremental change to the mirror and the observers.
    pub fn node_changed(&mut self, update: &NodeUpdate) -> Result<(), MirrorError> {
        if update.is_server() {
            self.broadcast(SessionEvent::DefsChanged(update.aspects.clone()));
            return Ok(());
        }

        if update.is_structural() {
            // The tree shape changed; the next sync completion rebuilds it.
            debug!(server = %self.options.name, path = %update.path, "structural change - clearing tree");
            self.clear_tree();
            return Ok(());
        }

        if self.mirror.is_empty() {
            debug!(server = %self.options.name, path = %update.path, "no change - tree is empty");
            return Ok(());
        }

        let mut change = NodeChange::default();
        self.mirror
            .begin_update(&update.path, &update.aspects, &mut change)?;
        if change.ignore {
            debug!(server = %self.options.name, path = %update.path, "update ignored");
            return Ok(());
        }

        self.broadcast(SessionEvent::NodeChangeBegin {
            path: update.path.clone(),
            aspects: update.aspects.clone(),
            change,
        });
        self.mirror.end_update(update, &mut change)?;
        self.broadcast(SessionEvent::NodeChangeEnd {
            path: update.path.clone(),
            aspects: update.aspects.clone(),
            change,
        });
        Ok(())
    }

    // ---- connection state ----------------------------------------------

    pub fn connection_lost(&mut self, message: &str) {
        if self.connect_state == ConnectState::Disconnected {
            return;
        }
        self.connect_state = ConnectState::Lost;
        self.connect_error = Some(message.to_string());
        self.broadcast(SessionEvent::ConnectStateChanged {
            state: ConnectState::Lost,
            error: Some(message.to_string()),
        });
    }

    pub fn connection_gained(&mut self) {
        if self.connect_state != ConnectState::Normal {
            self.connect_state = ConnectState::Normal;
            self.connect_error = None;
            self.broadcast(SessionEvent::ConnectStateChanged {
                state: ConnectState::Normal,
                error: None,
            });
        }
    }

    /// User-initiated disconnect: nothing is sent until `connect_server`.
    pub fn disconnect_server(&mut self) {
        if self.connect_state == ConnectState::Disconnected {
            return;
        }
        info!(server = %self.options.name, "disconnecting");
        self.connect_state = ConnectState::Disconnected;
        self.connect_error = None;
        self.broadcast(SessionEvent::ConnectStateChanged {
            state: ConnectState::Disconnected,
            error: None,
        });

        self.queue.disable();
        self.stop_refresh_timer();
    }

    /// User-initiated reconnect. Only acts on a disconnected session.
    pub fn connect_server(&mut self) {
        if self.connect_state != ConnectState::Disconnected || self.shutting_down {
            return;
        }
        info!(server = %self.options.name, "connecting");

        // Not confirmed until the server answers.
        self.connect_state = ConnectState::Lost;
        self.broadcast(SessionEvent::ConnectStateChanged {
            state: ConnectState::Lost,
            error: None,
        });

        self.queue.enable();
        self.reset_refresh_timer();

        // An empty mirror means the last reset never landed.
        if self.mirror.is_empty() {
            self.reset();
        } else {
            self.update();
        }
    }

    // ---- suite filter --------------------------------------------------

    pub fn update_suite_filter(&mut self, filter: &SuiteFilter) {
        let flags = self.suite_filter.update(filter);
        if !flags.any() {
            return;
        }
        if flags.only_auto_add() {
            self.queue
                .add_suite_auto_register_task(self.suite_filter.auto_add_new);
        } else {
            self.reset();
        }
    }

    pub fn update_loaded_suites(&mut self, names: &[String]) {
        self.suite_filter.set_loaded(names);
        self.broadcast(SessionEvent::SuiteFilterChanged);
    }

    // ---- shutdown --------------------------------------------------------

    /// Stop accepting work. The session is deleted once the in-flight task
    /// (if any) has completed.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!(server = %self.options.name, "shutting down");
        self.shutting_down = true;
        self.queue.disable();
        self.stop_refresh_timer();
        self.finish_shutdown_if_idle();
    }

    pub(super) fn finish_shutdown_if_idle(&mut self) {
        if self.shutting_down && !self.deleted && self.queue.in_flight().is_none() {
            self.broadcast(SessionEvent::ServerDeleted);
            self.deleted = true;
        }
    }

    // ---- queries ---------------------------------------------------------

    pub fn server_state(&self) -> ServerRunState {
        if self.connect_state != ConnectState::Normal || self.activity == Activity::LoadActivity {
            return ServerRunState::Running;
        }
        self.defs.server.state
    }

    /// Aggregate node state and whether the server is suspended.
    pub fn state(&self) -> (NodeState, bool) {
        if self.connect_state != ConnectState::Normal || self.activity == Activity::LoadActivity {
            return (NodeState::Unknown, false);
        }
        (self.defs.state(), self.defs.is_suspended())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (node_state, suspended) = self.state();
        SessionSnapshot {
            name: self.options.name.clone(),
            host: self.options.host.clone(),
            port: self.options.port.clone(),
            connect_state: self.connect_state,
            connect_error: self.connect_error.clone(),
            activity: self.activity,
            queue_state: self.queue.state(),
            server_state: self.server_state(),
            node_state,
            suspended,
            mirrored_suites: self.mirror.suite_names(),
            mirrored_nodes: self.mirror.total_num(),
            suite_filter: self.suite_filter.clone(),
            timer_running: self.timer_running,
        }
    }
}
