#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use suitelink::connection::ServerBackend;
use suitelink::errors::Result;
use suitelink::observer::{ChannelObserver, ObservedEvent, SessionEvent};
use suitelink::session::{QueueState, SessionHandle, SessionOptions, SessionSnapshot, spawn_session};

pub use suitelink_test_utils::{finished, init_tracing, with_timeout};

/// Test session: no periodic polling, default suite filter.
pub fn options(name: &str) -> SessionOptions {
    SessionOptions::new(name, "localhost", "3141").with_refresh_interval(None)
}

pub struct Running {
    pub handle: SessionHandle,
    pub join: JoinHandle<Result<()>>,
    pub events: UnboundedReceiver<ObservedEvent>,
}

/// Spawn a session and subscribe a channel observer right away.
pub async fn start<B>(options: SessionOptions, backend: B) -> Running
where
    B: ServerBackend + 'static,
{
    let (handle, join) = spawn_session(options, backend);
    let (observer, events) = ChannelObserver::channel();
    handle
        .subscribe(Box::new(observer))
        .await
        .expect("session accepts subscribers");
    Running { handle, join, events }
}

/// Poll until the queue is idle (nothing pending or in flight).
pub async fn settle(handle: &SessionHandle) -> SessionSnapshot {
    loop {
        let snapshot = handle.snapshot().await.expect("session alive");
        if snapshot.queue_state == QueueState::Idle {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Receive events until one matches, returning everything seen so far.
pub async fn events_until<F>(
    events: &mut UnboundedReceiver<ObservedEvent>,
    mut pred: F,
) -> Vec<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let mut seen = Vec::new();
    while let Some(observed) = events.recv().await {
        let done = pred(&observed.event);
        seen.push(observed.event);
        if done {
            break;
        }
    }
    seen
}

/// Drain whatever is already queued without waiting.
pub fn drain(events: &mut UnboundedReceiver<ObservedEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(observed) = events.try_recv() {
        seen.push(observed.event);
    }
    seen
}
