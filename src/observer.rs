// src/observer.rs

//! Session notifications and the observers that receive them.
//!
//! Every notification is one [`SessionEvent`] variant. A session keeps an
//! [`ObserverList`] and broadcasts each event to every subscriber in
//! registration order, from its own task. Observers must return quickly:
//! the next completion is not processed until the broadcast is done.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mirror::{LocalMirror, NodeChange, ServerChange};
use crate::types::{Activity, Aspect, ConnectState};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A full rebuild of the mirror is about to be committed.
    ServerScanBegin(ServerChange),
    ServerScanEnd,
    /// The mirror is about to be emptied.
    ServerClearBegin,
    ServerClearEnd,
    NodeChangeBegin {
        path: String,
        aspects: Vec<Aspect>,
        change: NodeChange,
    },
    NodeChangeEnd {
        path: String,
        aspects: Vec<Aspect>,
        change: NodeChange,
    },
    ConnectStateChanged {
        state: ConnectState,
        error: Option<String>,
    },
    ActivityChanged(Activity),
    /// Server-level attributes of the definition changed.
    DefsChanged(Vec<Aspect>),
    SuiteFilterChanged,
    /// The session has shut down; no further events follow.
    ServerDeleted,
}

/// Receiver of session notifications.
pub trait SessionObserver: Send {
    fn notify(&mut self, server: &str, event: &SessionEvent, mirror: &LocalMirror);
}

/// Token returned by [`ObserverList::add`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct ObserverList {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn SessionObserver>)>,
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl ObserverList {
    pub fn add(&mut self, observer: Box<dyn SessionObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push((id, observer));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        before != self.observers.len()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn broadcast(&mut self, server: &str, event: &SessionEvent, mirror: &LocalMirror) {
        for (_, observer) in self.observers.iter_mut() {
            observer.notify(server, event, mirror);
        }
    }
}

/// Event as forwarded by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEvent {
    pub server: String,
    pub event: SessionEvent,
    /// Suites mirrored when the event was broadcast.
    pub mirrored_suites: usize,
}

/// Forwards every event over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObservedEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ObservedEvent>) -> Self {
        Self { tx }
    }

    /// Observer plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ObservedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn notify(&mut self, server: &str, event: &SessionEvent, mirror: &LocalMirror) {
        let _ = self.tx.send(ObservedEvent {
            server: server.to_string(),
            event: event.clone(),
            mirrored_suites: mirror.num_of_children(),
        });
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn notify(&mut self, server: &str, event: &SessionEvent, mirror: &LocalMirror) {
        match event {
            SessionEvent::ConnectStateChanged { state, error: Some(err) } => {
                warn!(server, %state, error = %err, "connection state changed");
            }
            SessionEvent::ConnectStateChanged { state, error: None } => {
                info!(server, %state, "connection state changed");
            }
            SessionEvent::ServerScanEnd => {
                info!(
                    server,
                    suites = mirror.num_of_children(),
                    nodes = mirror.total_num(),
                    "mirror rebuilt"
                );
            }
            SessionEvent::ServerDeleted => info!(server, "session closed"),
            SessionEvent::NodeChangeEnd { path, aspects, .. } => {
                debug!(server, path = %path, ?aspects, "node changed");
            }
            other => debug!(server, event = ?other, "session event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_observer_stops_receiving() {
        let mirror = LocalMirror::new();
        let mut list = ObserverList::default();
        let (a, mut rx_a) = ChannelObserver::channel();
        let (b, mut rx_b) = ChannelObserver::channel();
        let id_a = list.add(Box::new(a));
        list.add(Box::new(b));

        list.broadcast("srv", &SessionEvent::ServerClearBegin, &mirror);
        assert!(list.remove(id_a));
        assert!(!list.remove(id_a));
        list.broadcast("srv", &SessionEvent::ServerClearEnd, &mirror);

        assert_eq!(rx_a.try_recv().unwrap().event, SessionEvent::ServerClearBegin);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().event, SessionEvent::ServerClearBegin);
        assert_eq!(rx_b.try_recv().unwrap().event, SessionEvent::ServerClearEnd);
    }
}
