use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::debug;

use suitelink::connection::{ConnectionError, Credential, ServerBackend};
use suitelink::defs::Defs;
use suitelink::wire::{News, Request, ServerReply, Stats};

use crate::builders::sample_defs;

pub type Responder = Box<dyn FnMut(&Request) -> Result<ServerReply, ConnectionError> + Send>;

/// Shared view of what a [`FakeBackend`] saw.
#[derive(Clone, Default)]
pub struct BackendRecord {
    inner: Arc<RecordInner>,
}

#[derive(Default)]
struct RecordInner {
    requests: Mutex<Vec<Request>>,
    credentials: Mutex<Vec<Credential>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    dropped: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl BackendRecord {
    pub fn requests(&self) -> Vec<Request> {
        self.inner.requests.lock().unwrap().clone()
    }

    /// Request names in arrival order, e.g. `["reset", "suite_list"]`.
    pub fn request_names(&self) -> Vec<&'static str> {
        self.requests().iter().map(Request::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.request_names().iter().filter(|n| **n == name).count()
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.inner.credentials.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `send` calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_dropped(&self) -> bool {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    /// Hold every reply until [`BackendRecord::release`] lets it through.
    pub fn close_gate(&self) {
        *self.inner.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held replies through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.inner.gate.lock().unwrap().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Stop holding replies.
    pub fn open_gate(&self) {
        if let Some(gate) = self.inner.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Poll until `n` requests have arrived.
    pub async fn wait_for_requests(&self, n: usize) {
        while self.requests().len() < n {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    fn enter(&self, request: &Request) {
        self.inner.requests.lock().unwrap().push(request.clone());
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn gate(&self) -> Option<Arc<Semaphore>> {
        self.inner.gate.lock().unwrap().clone()
    }
}

/// A scripted [`ServerBackend`] that:
/// - records every request it receives
/// - counts overlapping calls
/// - answers through a responder closure
/// - can hold replies behind a gate
pub struct FakeBackend {
    record: BackendRecord,
    responder: Responder,
}

impl FakeBackend {
    pub fn new(responder: Responder) -> (Self, BackendRecord) {
        let record = BackendRecord::default();
        (
            Self {
                record: record.clone(),
                responder,
            },
            record,
        )
    }

    /// Healthy server holding `defs`.
    pub fn serving(defs: Defs) -> (Self, BackendRecord) {
        Self::new(Box::new(move |request| Ok(default_reply(&defs, request))))
    }

    /// Healthy server holding [`sample_defs`].
    pub fn healthy() -> (Self, BackendRecord) {
        Self::serving(sample_defs())
    }

    /// Every request fails with `error`.
    pub fn failing(error: ConnectionError) -> (Self, BackendRecord) {
        Self::new(Box::new(move |_| Err(error.clone())))
    }
}

/// What a healthy server with `defs` and nothing new to report answers.
pub fn default_reply(defs: &Defs, request: &Request) -> ServerReply {
    match request {
        Request::Reset { .. } => ServerReply::defs(defs.clone()),
        Request::News => ServerReply::news(News::NoNews),
        Request::Sync => ServerReply::changes(Vec::new()),
        Request::SuiteList => ServerReply::lines(defs.suite_names()),
        Request::Command { args } => ServerReply::text(format!("ok: {}", args.join(" "))),
        Request::File { path, kind } => {
            ServerReply::text(format!("{} of {path}", kind.client_par()))
        }
        Request::History { path } => ServerReply::text(format!("history of {path}")),
        Request::Messages { path } => {
            ServerReply::lines(vec![format!("msg 1 for {path}"), format!("msg 2 for {path}")])
        }
        Request::Stats => ServerReply {
            stats: Some(Stats {
                version: "5.0.0".into(),
                ..Stats::default()
            }),
            ..ServerReply::default()
        },
        Request::ScriptPreprocess { path } | Request::ScriptEdit { path } => {
            ServerReply::text(format!("script {path}"))
        }
        Request::ScriptSubmit { path, .. } => ServerReply::text(format!("submitted {path}")),
        Request::SuiteAutoRegister { .. } => ServerReply::default(),
    }
}

impl ServerBackend for FakeBackend {
    fn send(
        &mut self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<ServerReply, ConnectionError>> + Send + '_>> {
        Box::pin(async move {
            self.record.enter(&request);
            debug!(request = request.name(), "fake backend received request");

            if let Some(gate) = self.record.gate() {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            let reply = (self.responder)(&request);
            self.record.leave();
            if let Err(err) = &reply {
                debug!(request = request.name(), error = %err, "fake backend failing request");
            }
            reply
        })
    }

    fn set_credential(&mut self, credential: Credential) {
        debug!(user = ?credential.user(), "fake backend credential replaced");
        self.record.inner.credentials.lock().unwrap().push(credential);
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.record.inner.dropped.store(true, Ordering::SeqCst);
    }
}
