// src/session/runtime.rs

//! Async shell around [`SessionCore`].
//!
//! One tokio task per session reads requests from [`SessionHandle`]s,
//! completions from the dispatch worker and ticks from the refresh timer,
//! and feeds them into the core one at a time. The commands the core
//! returns are carried out here: tasks go to the worker, timer commands
//! reset or drop the interval.

use std::fmt;
use std::future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionError, Credential, ServerBackend};
use crate::errors::{Result, SuitelinkError};
use crate::observer::{ObserverId, SessionObserver};
use crate::queue::{Completion, WorkerMessage, spawn_worker};
use crate::task::TaskRef;

use super::{SessionCommand, SessionCore, SessionOptions, SessionSnapshot, SuiteFilter};

/// Requests a [`SessionHandle`] sends to its session.
pub enum SessionRequest {
    RunCommand {
        args: Vec<String>,
        reply: oneshot::Sender<Option<TaskRef>>,
    },
    Run(TaskRef),
    Refresh,
    Reset,
    Connect,
    Disconnect,
    UpdateSuiteFilter(SuiteFilter),
    Subscribe {
        observer: Box<dyn SessionObserver>,
        reply: oneshot::Sender<ObserverId>,
    },
    Unsubscribe(ObserverId),
    SetCredential(Credential),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRequest::RunCommand { args, .. } => {
                f.debug_struct("RunCommand").field("args", args).finish_non_exhaustive()
            }
            SessionRequest::Run(task) => f.debug_tuple("Run").field(&task.kind()).finish(),
            SessionRequest::Refresh => f.write_str("Refresh"),
            SessionRequest::Reset => f.write_str("Reset"),
            SessionRequest::Connect => f.write_str("Connect"),
            SessionRequest::Disconnect => f.write_str("Disconnect"),
            SessionRequest::UpdateSuiteFilter(filter) => {
                f.debug_tuple("UpdateSuiteFilter").field(filter).finish()
            }
            SessionRequest::Subscribe { .. } => f.write_str("Subscribe"),
            SessionRequest::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
            SessionRequest::SetCredential(c) => f.debug_tuple("SetCredential").field(c).finish(),
            SessionRequest::Snapshot(_) => f.write_str("Snapshot"),
            SessionRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}

pub struct SessionRuntime {
    core: SessionCore,
    requests: mpsc::Receiver<SessionRequest>,
    requests_open: bool,
    completions: mpsc::Receiver<Completion>,
    worker_tx: Option<mpsc::Sender<WorkerMessage>>,
    worker: Option<JoinHandle<()>>,
    timer: Option<Interval>,
}

impl fmt::Debug for SessionRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRuntime")
            .field("core", &self.core)
            .field("timer", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionRuntime {
    /// Build the runtime and spawn its dispatch worker, which takes
    /// ownership of `backend`. Must be called inside a tokio runtime.
    pub fn new<B>(core: SessionCore, requests: mpsc::Receiver<SessionRequest>, backend: B) -> Self
    where
        B: ServerBackend + 'static,
    {
        let (completion_tx, completions) = mpsc::channel::<Completion>(8);
        let (worker_tx, worker) = spawn_worker(backend, completion_tx);
        Self {
            core,
            requests,
            requests_open: true,
            completions,
            worker_tx: Some(worker_tx),
            worker: Some(worker),
            timer: None,
        }
    }

    /// Main loop. Starts with a reset, ends after an ordered shutdown.
    pub async fn run(mut self) -> Result<()> {
        let name = self.core.name().to_string();
        info!(server = %name, "session runtime started");

        self.core.reset();
        let mut keep_running = self.drive().await;

        while keep_running {
            tokio::select! {
                request = self.requests.recv(), if self.requests_open => match request {
                    Some(request) => {
                        debug!(server = %name, ?request, "session request");
                        self.handle_request(request);
                    }
                    None => {
                        info!(server = %name, "all session handles dropped; shutting down");
                        self.requests_open = false;
                        self.core.shutdown();
                    }
                },
                Some(completion) = self.completions.recv() => {
                    self.core.task_completed(completion);
                }
                _ = next_tick(&mut self.timer) => {
                    self.core.refresh_tick();
                }
            }

            keep_running = self.drive().await;
        }

        self.stop_worker().await;
        info!(server = %name, "session runtime exiting");
        Ok(())
    }

    fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::RunCommand { args, reply } => {
                let _ = reply.send(self.core.run_command(args));
            }
            SessionRequest::Run(task) => self.core.run(task),
            SessionRequest::Refresh => self.core.refresh(),
            SessionRequest::Reset => self.core.reset(),
            SessionRequest::Connect => self.core.connect_server(),
            SessionRequest::Disconnect => self.core.disconnect_server(),
            SessionRequest::UpdateSuiteFilter(filter) => self.core.update_suite_filter(&filter),
            SessionRequest::Subscribe { observer, reply } => {
                let _ = reply.send(self.core.subscribe(observer));
            }
            SessionRequest::Unsubscribe(id) => {
                self.core.unsubscribe(id);
            }
            SessionRequest::SetCredential(credential) => self.forward_credential(credential),
            SessionRequest::Snapshot(reply) => {
                let _ = reply.send(self.core.snapshot());
            }
            SessionRequest::Shutdown => self.core.shutdown(),
        }
    }

    /// Execute what the core asked for. Returns whether to keep running.
    async fn drive(&mut self) -> bool {
        loop {
            let step = self.core.take_step();
            let mut redo = false;

            for command in step.commands {
                match command {
                    SessionCommand::Dispatch(task) => {
                        if let Err(task) = self.dispatch(task).await {
                            self.core.task_completed(Completion {
                                task,
                                outcome: Err(ConnectionError::protocol("dispatch worker stopped")),
                            });
                            redo = true;
                        }
                    }
                    SessionCommand::StartTimer(period) => {
                        let mut timer = interval_at(Instant::now() + period, period);
                        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        self.timer = Some(timer);
                    }
                    SessionCommand::StopTimer => {
                        self.timer = None;
                    }
                }
            }

            if !step.keep_running {
                return false;
            }
            if !redo {
                return true;
            }
        }
    }

    async fn dispatch(&mut self, task: TaskRef) -> std::result::Result<(), TaskRef> {
        let Some(tx) = &self.worker_tx else {
            return Err(task);
        };
        match tx.send(WorkerMessage::Run(task.clone())).await {
            Ok(()) => Ok(()),
            Err(_) => Err(task),
        }
    }

    fn forward_credential(&mut self, credential: Credential) {
        let Some(tx) = &self.worker_tx else {
            return;
        };
        // Queued behind any in-flight request, so never applied mid-flight.
        if tx.try_send(WorkerMessage::SetCredential(credential)).is_err() {
            warn!(server = %self.core.name(), "could not forward credential to dispatch worker");
        }
    }

    /// Drop the worker's input and wait for it to release the connection.
    async fn stop_worker(&mut self) {
        self.worker_tx = None;
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                warn!(server = %self.core.name(), error = %err, "dispatch worker ended abnormally");
            }
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    name: String,
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: SessionRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| SuitelinkError::SessionClosed(self.name.clone()))
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await
            .map_err(|_| SuitelinkError::SessionClosed(self.name.clone()))
    }

    /// Queue a command. `None` when the session is disconnected.
    pub async fn run_command(&self, args: Vec<String>) -> Result<Option<TaskRef>> {
        self.ask(|reply| SessionRequest::RunCommand { args, reply }).await
    }

    /// Route a data fetch; watch the task for the outcome.
    pub async fn run(&self, task: TaskRef) -> Result<()> {
        self.send(SessionRequest::Run(task)).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.send(SessionRequest::Refresh).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(SessionRequest::Reset).await
    }

    pub async fn connect(&self) -> Result<()> {
        self.send(SessionRequest::Connect).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(SessionRequest::Disconnect).await
    }

    pub async fn update_suite_filter(&self, filter: SuiteFilter) -> Result<()> {
        self.send(SessionRequest::UpdateSuiteFilter(filter)).await
    }

    pub async fn subscribe(&self, observer: Box<dyn SessionObserver>) -> Result<ObserverId> {
        self.ask(|reply| SessionRequest::Subscribe { observer, reply })
            .await
    }

    pub async fn unsubscribe(&self, id: ObserverId) -> Result<()> {
        self.send(SessionRequest::Unsubscribe(id)).await
    }

    /// Replace the credential. Applied between requests.
    pub async fn set_credential(&self, credential: Credential) -> Result<()> {
        self.send(SessionRequest::SetCredential(credential)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.ask(SessionRequest::Snapshot).await
    }

    /// Ordered shutdown. Returns once the session task has released its
    /// queue, worker and connection.
    pub async fn shutdown(&self) -> Result<()> {
        // Already gone counts as shut down.
        let _ = self.tx.send(SessionRequest::Shutdown).await;
        self.tx.closed().await;
        Ok(())
    }
}

/// Spawn a session for one server. The session starts with a reset.
pub fn spawn_session<B>(
    options: SessionOptions,
    backend: B,
) -> (SessionHandle, JoinHandle<Result<()>>)
where
    B: ServerBackend + 'static,
{
    let (tx, rx) = mpsc::channel::<SessionRequest>(64);
    let name = options.name.clone();
    let core = SessionCore::new(options);
    let runtime = SessionRuntime::new(core, rx, backend);
    let join = tokio::spawn(runtime.run());
    (SessionHandle { name, tx }, join)
}
