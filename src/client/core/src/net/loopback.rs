//! In-process transport.
//!
//! A [`LoopbackRouter`] plays the remote side for any number of sessions
//! opened through it: it routes writes to matching subscribers and
//! storages, and fans queries out to matching storages and evals. Events
//! are delivered from a dedicated delivery thread in write order; each
//! query runs on its own thread so handlers may answer from anywhere.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, error, trace};
use uuid::Uuid;

use super::dispatch::Dispatcher;
use super::keyexpr;
use super::transport::{Connector, Transport, TransportError, TransportResult};
use super::types::{ChangeKind, DataInfo, Handle, RepliesSender, ReplyEvent, Sample, SubMode};
use crate::addressing::Properties;
use crate::timestamp::{ClockId, Timestamp};
use crate::value::Encoding;

/// Locator scheme accepted by [`LoopbackRouter`].
pub const LOOPBACK_SCHEME: &str = "loopback/";

/// Monotonic timestamp source with a random clock id.
pub struct LoopbackClock {
    id: ClockId,
    last: Mutex<u64>,
}

impl Default for LoopbackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackClock {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().into_bytes(),
            last: Mutex::new(0),
        }
    }

    pub fn id(&self) -> &ClockId {
        &self.id
    }

    /// A timestamp strictly greater than every one returned before.
    pub fn now(&self) -> Timestamp {
        let wall = Timestamp::from_system_time(SystemTime::now(), self.id).time();
        let mut last = self.last.lock();
        let next = wall.max(*last + 1);
        *last = next;
        Timestamp::new(next, self.id)
    }
}

struct Declaration {
    session: u64,
    handle: Handle,
    expr: String,
    dispatcher: Weak<Dispatcher>,
}

struct SubscriberDeclaration {
    decl: Declaration,
    mode: SubMode,
    pending: Vec<Sample>,
}

struct InjectedFailure {
    remaining: usize,
    code: i32,
    name: String,
}

#[derive(Default)]
struct RouterState {
    subscribers: Vec<SubscriberDeclaration>,
    storages: Vec<Declaration>,
    evals: Vec<Declaration>,
    failure: Option<InjectedFailure>,
}

struct QueryJob {
    querier: Weak<Dispatcher>,
    reply_handle: Handle,
    expr: String,
    optional_part: String,
    storages: Vec<(Weak<Dispatcher>, Handle)>,
    evals: Vec<(Weak<Dispatcher>, Handle)>,
    clock: Option<Arc<LoopbackClock>>,
}

enum Job {
    Subscriber {
        dispatcher: Weak<Dispatcher>,
        handle: Handle,
        sample: Sample,
    },
    Storage {
        dispatcher: Weak<Dispatcher>,
        handle: Handle,
        sample: Sample,
    },
    Query(QueryJob),
}

struct RouterShared {
    state: Mutex<RouterState>,
    jobs: mpsc::Sender<Job>,
    clock: Arc<LoopbackClock>,
    stamp_replies: AtomicBool,
    next_session: AtomicU64,
}

impl RouterShared {
    fn check_failure(&self, state: &mut RouterState) -> TransportResult<()> {
        let Some(failure) = state.failure.as_mut() else {
            return Ok(());
        };
        let error = TransportError::Failed {
            code: failure.code,
            name: failure.name.clone(),
        };
        failure.remaining -= 1;
        if failure.remaining == 0 {
            state.failure = None;
        }
        Err(error)
    }

    fn enqueue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            error!("Loopback delivery thread is gone, dropping event");
        }
    }
}

/// The in-process stand-in for a remote router.
#[derive(Clone)]
pub struct LoopbackRouter {
    shared: Arc<RouterShared>,
}

impl Default for LoopbackRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRouter {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let spawned = thread::Builder::new()
            .name("loopback-delivery".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    run_job(job);
                }
                trace!("Loopback delivery thread exiting");
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to start loopback delivery thread");
        }

        Self {
            shared: Arc::new(RouterShared {
                state: Mutex::new(RouterState::default()),
                jobs: tx,
                clock: Arc::new(LoopbackClock::new()),
                stamp_replies: AtomicBool::new(true),
                next_session: AtomicU64::new(0),
            }),
        }
    }

    /// Make the next `count` operations fail with `code`.
    pub fn fail_next(&self, count: usize, code: i32, name: impl Into<String>) {
        let mut state = self.shared.state.lock();
        state.failure = (count > 0).then(|| InjectedFailure {
            remaining: count,
            code,
            name: name.into(),
        });
    }

    /// Whether query replies without a timestamp get one from the router clock.
    pub fn set_stamp_replies(&self, stamp: bool) {
        self.shared.stamp_replies.store(stamp, Ordering::SeqCst);
    }

    pub fn clock(&self) -> &LoopbackClock {
        &self.shared.clock
    }

    /// Number of live storage declarations across all sessions.
    pub fn storage_count(&self) -> usize {
        self.shared.state.lock().storages.len()
    }

    /// Number of live subscriber declarations across all sessions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Number of live eval declarations across all sessions.
    pub fn eval_count(&self) -> usize {
        self.shared.state.lock().evals.len()
    }
}

impl Connector for LoopbackRouter {
    fn open(
        &self,
        locator: Option<&str>,
        properties: &Properties,
        dispatcher: Arc<Dispatcher>,
    ) -> TransportResult<Arc<dyn Transport>> {
        if let Some(locator) = locator {
            if !locator.starts_with(LOOPBACK_SCHEME) {
                return Err(TransportError::InvalidLocator(locator.to_string()));
            }
        }
        self.shared.check_failure(&mut self.shared.state.lock())?;

        let session = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        let transport = LoopbackTransport {
            session,
            peer_id: Uuid::new_v4().into_bytes(),
            locator: locator.unwrap_or("loopback/local").to_string(),
            user: properties.get("user").map(str::to_string),
            router: self.shared.clone(),
            dispatcher: Arc::downgrade(&dispatcher),
            closed: AtomicBool::new(false),
        };
        debug!(session, locator = %transport.locator, "Opened loopback transport");
        Ok(Arc::new(transport))
    }
}

/// One session's view of a [`LoopbackRouter`].
pub struct LoopbackTransport {
    session: u64,
    peer_id: [u8; 16],
    locator: String,
    user: Option<String>,
    router: Arc<RouterShared>,
    dispatcher: Weak<Dispatcher>,
    closed: AtomicBool,
}

impl LoopbackTransport {
    fn declaration(&self, expr: &str, handle: Handle) -> Declaration {
        Declaration {
            session: self.session,
            handle,
            expr: expr.to_string(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Lock the router state after checking the session and injected failures.
    fn begin(&self) -> TransportResult<parking_lot::MutexGuard<'_, RouterState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut state = self.router.state.lock();
        self.router.check_failure(&mut state)?;
        Ok(state)
    }

    fn owns(&self, decl: &Declaration, handle: Handle) -> bool {
        decl.session == self.session && decl.handle == handle
    }
}

impl Transport for LoopbackTransport {
    fn info(&self) -> Properties {
        let mut info = Properties::new()
            .with("peer", hex::encode(self.peer_id))
            .with("locator", self.locator.clone());
        if let Some(user) = &self.user {
            info.insert("user", user.clone());
        }
        info
    }

    fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut state = self.router.state.lock();
        state.subscribers.retain(|s| s.decl.session != self.session);
        state.storages.retain(|s| s.session != self.session);
        state.evals.retain(|e| e.session != self.session);
        debug!(session = self.session, "Closed loopback transport");
        Ok(())
    }

    fn write_data(&self, path: &str, payload: &[u8], encoding: Encoding, kind: ChangeKind) -> TransportResult<()> {
        let mut state = self.begin()?;
        let info = DataInfo::new()
            .with_timestamp(self.router.clock.now())
            .with_encoding(encoding)
            .with_kind(kind);
        let sample = Sample::new(path, payload.to_vec(), info);

        for sub in state.subscribers.iter_mut() {
            if !keyexpr::matches(&sub.decl.expr, path) {
                continue;
            }
            match sub.mode {
                SubMode::Push => self.router.enqueue(Job::Subscriber {
                    dispatcher: sub.decl.dispatcher.clone(),
                    handle: sub.decl.handle,
                    sample: sample.clone(),
                }),
                SubMode::Pull => sub.pending.push(sample.clone()),
            }
        }
        for storage in state.storages.iter().filter(|s| keyexpr::matches(&s.expr, path)) {
            self.router.enqueue(Job::Storage {
                dispatcher: storage.dispatcher.clone(),
                handle: storage.handle,
                sample: sample.clone(),
            });
        }
        trace!(path, kind = %kind, "Routed write");
        Ok(())
    }

    fn declare_subscriber(&self, expr: &str, mode: SubMode, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        state.subscribers.push(SubscriberDeclaration {
            decl: self.declaration(expr, handle),
            mode,
            pending: Vec::new(),
        });
        Ok(())
    }

    fn undeclare_subscriber(&self, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        let before = state.subscribers.len();
        state.subscribers.retain(|s| !self.owns(&s.decl, handle));
        if state.subscribers.len() == before {
            return Err(TransportError::UnknownDeclaration(handle));
        }
        Ok(())
    }

    fn pull(&self, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        let sub = state
            .subscribers
            .iter_mut()
            .find(|s| self.owns(&s.decl, handle))
            .ok_or(TransportError::UnknownDeclaration(handle))?;
        let dispatcher = sub.decl.dispatcher.clone();
        let pending = std::mem::take(&mut sub.pending);
        for sample in pending {
            self.router.enqueue(Job::Subscriber {
                dispatcher: dispatcher.clone(),
                handle,
                sample,
            });
        }
        Ok(())
    }

    fn declare_storage(&self, expr: &str, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        state.storages.push(self.declaration(expr, handle));
        Ok(())
    }

    fn undeclare_storage(&self, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        let before = state.storages.len();
        state.storages.retain(|s| !self.owns(s, handle));
        if state.storages.len() == before {
            return Err(TransportError::UnknownDeclaration(handle));
        }
        Ok(())
    }

    fn declare_eval(&self, path: &str, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        state.evals.push(self.declaration(path, handle));
        Ok(())
    }

    fn undeclare_eval(&self, handle: Handle) -> TransportResult<()> {
        let mut state = self.begin()?;
        let before = state.evals.len();
        state.evals.retain(|e| !self.owns(e, handle));
        if state.evals.len() == before {
            return Err(TransportError::UnknownDeclaration(handle));
        }
        Ok(())
    }

    fn query(&self, expr: &str, optional_part: &str, handle: Handle) -> TransportResult<()> {
        let state = self.begin()?;
        let targets = |decls: &[Declaration]| {
            decls
                .iter()
                .filter(|d| keyexpr::intersect(&d.expr, expr))
                .map(|d| (d.dispatcher.clone(), d.handle))
                .collect::<Vec<_>>()
        };
        let job = QueryJob {
            querier: self.dispatcher.clone(),
            reply_handle: handle,
            expr: expr.to_string(),
            optional_part: optional_part.to_string(),
            storages: targets(&state.storages),
            evals: targets(&state.evals),
            clock: self
                .router
                .stamp_replies
                .load(Ordering::SeqCst)
                .then(|| self.router.clock.clone()),
        };
        trace!(expr, storages = job.storages.len(), evals = job.evals.len(), "Routed query");
        self.router.enqueue(Job::Query(job));
        Ok(())
    }
}

fn run_job(job: Job) {
    match job {
        Job::Subscriber { dispatcher, handle, sample } => {
            if let Some(d) = dispatcher.upgrade() {
                d.dispatch_data(handle, &sample);
            }
        }
        Job::Storage { dispatcher, handle, sample } => {
            if let Some(d) = dispatcher.upgrade() {
                d.dispatch_storage_data(handle, &sample);
            }
        }
        Job::Query(query) => {
            let querier = query.querier.clone();
            let reply_handle = query.reply_handle;
            let spawned = thread::Builder::new()
                .name("loopback-query".into())
                .spawn(move || run_query(query));
            if let Err(e) = spawned {
                error!(error = %e, "Failed to start query thread, answering with no replies");
                if let Some(d) = querier.upgrade() {
                    d.dispatch_reply(reply_handle, ReplyEvent::ReplyFinal);
                }
            }
        }
    }
}

/// Hand a sender to `ask` and wait for whatever it replies.
fn collect_replies(ask: impl FnOnce(RepliesSender)) -> Vec<Sample> {
    let (tx, rx) = mpsc::channel();
    ask(RepliesSender::new(move |replies| {
        let _ = tx.send(replies);
    }));
    rx.recv().unwrap_or_default()
}

fn run_query(job: QueryJob) {
    let Some(querier) = job.querier.upgrade() else {
        return;
    };
    let stamp = |mut sample: Sample| {
        if let (None, Some(clock)) = (sample.info.timestamp, &job.clock) {
            sample.info.timestamp = Some(clock.now());
        }
        sample
    };

    for (dispatcher, handle) in &job.storages {
        let replies = collect_replies(|sender| match dispatcher.upgrade() {
            Some(d) => d.dispatch_storage_query(*handle, &job.expr, &job.optional_part, sender),
            None => sender.send(Vec::new()),
        });
        for sample in replies {
            querier.dispatch_reply(job.reply_handle, ReplyEvent::StorageData(stamp(sample)));
        }
        querier.dispatch_reply(job.reply_handle, ReplyEvent::StorageFinal);
    }

    for (dispatcher, handle) in &job.evals {
        let replies = collect_replies(|sender| match dispatcher.upgrade() {
            Some(d) => d.dispatch_eval_query(*handle, &job.expr, &job.optional_part, sender),
            None => sender.send(Vec::new()),
        });
        for sample in replies {
            querier.dispatch_reply(job.reply_handle, ReplyEvent::EvalData(stamp(sample)));
        }
        querier.dispatch_reply(job.reply_handle, ReplyEvent::EvalFinal);
    }

    querier.dispatch_reply(job.reply_handle, ReplyEvent::ReplyFinal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::dispatch::{DataHandler, QueryHandler, ReplyHandler, StorageHandlers};
    use std::time::Duration;

    fn open(router: &LoopbackRouter) -> (Arc<Dispatcher>, Arc<dyn Transport>) {
        let dispatcher = Arc::new(Dispatcher::new());
        let transport = router.open(None, &Properties::new(), dispatcher.clone()).unwrap();
        (dispatcher, transport)
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = LoopbackClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a < b);
        assert_eq!(a.clock_id(), b.clock_id());
    }

    #[test]
    fn test_rejects_foreign_locator() {
        let router = LoopbackRouter::new();
        let err = router
            .open(Some("tcp/127.0.0.1:7447"), &Properties::new(), Arc::new(Dispatcher::new()))
            .err();
        assert!(matches!(err, Some(TransportError::InvalidLocator(_))));
    }

    #[test]
    fn test_write_reaches_matching_subscriber() {
        let router = LoopbackRouter::new();
        let (dispatcher, transport) = open(&router);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: DataHandler = Arc::new(move |s: &Sample| {
            let _ = tx.lock().send(s.clone());
        });
        let handle = dispatcher.subscribers().register(handler).unwrap();
        transport.declare_subscriber("/demo/*", SubMode::Push, handle).unwrap();

        transport.write_data("/other/a", b"x", 0, ChangeKind::Put).unwrap();
        transport.write_data("/demo/a", b"1", 6, ChangeKind::Update).unwrap();

        let sample = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sample.path, "/demo/a");
        assert_eq!(sample.info.encoding, Some(6));
        assert_eq!(sample.info.kind, Some(ChangeKind::Update.as_u8()));
        assert!(sample.info.timestamp.is_some());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_pull_subscriber_buffers_until_pulled() {
        let router = LoopbackRouter::new();
        let (dispatcher, transport) = open(&router);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: DataHandler = Arc::new(move |s: &Sample| {
            let _ = tx.lock().send(s.path.clone());
        });
        let handle = dispatcher.subscribers().register(handler).unwrap();
        transport.declare_subscriber("/p/**", SubMode::Pull, handle).unwrap();

        transport.write_data("/p/a", b"1", 0, ChangeKind::Put).unwrap();
        transport.write_data("/p/b", b"2", 0, ChangeKind::Put).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        transport.pull(handle).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "/p/a");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "/p/b");
    }

    #[test]
    fn test_query_reply_sequence() {
        let router = LoopbackRouter::new();
        let (dispatcher, transport) = open(&router);

        let data: DataHandler = Arc::new(|_: &Sample| {});
        let query: QueryHandler = Arc::new(|expr: &str, _: &str, sender: RepliesSender| {
            sender.send(vec![Sample::new(expr, b"s".to_vec(), DataInfo::new())]);
        });
        let storage = dispatcher.storages().register(StorageHandlers { data, query }).unwrap();
        transport.declare_storage("/q/**", storage).unwrap();

        let eval: QueryHandler = Arc::new(|_: &str, _: &str, _sender: RepliesSender| {});
        let eval_handle = dispatcher.evals().register(eval).unwrap();
        transport.declare_eval("/q/eval", eval_handle).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let replies: ReplyHandler = Arc::new(move |e: ReplyEvent| {
            let _ = tx.lock().send(e);
        });
        let reply_handle = dispatcher.replies().register(replies).unwrap();
        transport.query("/q/*", "", reply_handle).unwrap();

        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            let done = event.is_final();
            events.push(event);
            if done {
                break;
            }
        }
        assert_eq!(events.len(), 4);
        let sample = events[0].sample().unwrap();
        assert!(sample.info.timestamp.is_some());
        assert_eq!(events[1], ReplyEvent::StorageFinal);
        assert_eq!(events[2], ReplyEvent::EvalFinal);
    }

    #[test]
    fn test_injected_failures_then_recovery() {
        let router = LoopbackRouter::new();
        let (_dispatcher, transport) = open(&router);
        router.fail_next(2, 11, "BUSY");

        let err = transport.write_data("/a", b"", 0, ChangeKind::Put).unwrap_err();
        assert_eq!(err.code(), Some(11));
        assert!(transport.declare_storage("/a", 0).is_err());
        transport.declare_storage("/a", 0).unwrap();
        assert_eq!(router.storage_count(), 1);
    }

    #[test]
    fn test_close_drops_declarations() {
        let router = LoopbackRouter::new();
        let (_dispatcher, transport) = open(&router);
        transport.declare_eval("/e", 0).unwrap();
        transport.declare_subscriber("/s", SubMode::Push, 0).unwrap();
        transport.close().unwrap();

        assert_eq!(router.eval_count(), 0);
        assert_eq!(router.subscriber_count(), 0);
        assert_eq!(transport.write_data("/a", b"", 0, ChangeKind::Put), Err(TransportError::Closed));
        assert_eq!(transport.close(), Err(TransportError::Closed));
    }

    #[test]
    fn test_undeclare_unknown_handle() {
        let router = LoopbackRouter::new();
        let (_dispatcher, transport) = open(&router);
        assert_eq!(
            transport.undeclare_storage(42),
            Err(TransportError::UnknownDeclaration(42))
        );
    }
}
