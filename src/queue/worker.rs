// src/queue/worker.rs

//! Dedicated dispatch worker.
//!
//! The worker owns the [`ServerBackend`] and runs one task at a time. It
//! never decides what to run: the session sends it exactly one task after
//! each completion. Results go back as [`Completion`]s on the session's
//! input channel.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::{ConnectionError, Credential, ServerBackend};
use crate::task::TaskRef;
use crate::wire::ServerReply;

/// Messages the session sends to its worker.
#[derive(Debug)]
pub enum WorkerMessage {
    Run(TaskRef),
    /// Applied after any request already handed to the worker.
    SetCredential(Credential),
}

/// Outcome of one dispatched task.
#[derive(Debug)]
pub struct Completion {
    pub task: TaskRef,
    pub outcome: Result<ServerReply, ConnectionError>,
}

/// Spawn the worker loop. The loop ends when the returned sender is
/// dropped; the backend is dropped after the last request has finished.
pub fn spawn_worker<B, E>(
    mut backend: B,
    events: mpsc::Sender<E>,
) -> (mpsc::Sender<WorkerMessage>, JoinHandle<()>)
where
    B: ServerBackend + 'static,
    E: From<Completion> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<WorkerMessage>(8);

    let handle = tokio::spawn(async move {
        debug!("dispatch worker started");

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Run(task) => {
                    debug!(task = task.id(), kind = %task.kind(), "dispatching task");
                    let outcome = match task.request() {
                        Ok(request) => backend.send(request).await,
                        Err(err) => Err(err),
                    };
                    if events.send(Completion { task, outcome }.into()).await.is_err() {
                        info!("session input closed; dispatch worker stopping");
                        break;
                    }
                }
                WorkerMessage::SetCredential(credential) => {
                    backend.set_credential(credential);
                }
            }
        }

        drop(backend);
        debug!("dispatch worker finished; connection released");
    });

    (tx, handle)
}
