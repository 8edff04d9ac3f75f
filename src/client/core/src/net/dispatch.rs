//! Routing of transport events back to registered listeners.
//!
//! The transport only knows handles. [`Dispatcher`] owns the four handle
//! registries and turns `(handle, event)` pairs into listener calls. Every
//! call is guarded: a panicking listener is logged and counted, and a
//! panicking query handler drops its [`RepliesSender`], which answers the
//! query with an empty reply set.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use metrics::counter;
use tracing::{trace, warn};

use super::handles::HandleRegistry;
use super::types::{Handle, RepliesSender, ReplyEvent, Sample};

/// Receives samples for a subscriber or a storage.
pub type DataHandler = Arc<dyn Fn(&Sample) + Send + Sync>;

/// Answers a query: `(path expression, optional part, sender)`.
pub type QueryHandler = Arc<dyn Fn(&str, &str, RepliesSender) + Send + Sync>;

/// Receives the reply events of one query.
pub type ReplyHandler = Arc<dyn Fn(ReplyEvent) + Send + Sync>;

/// Both halves of a storage.
#[derive(Clone)]
pub struct StorageHandlers {
    pub data: DataHandler,
    pub query: QueryHandler,
}

/// Run a listener, containing any panic. Returns false if it panicked.
pub(crate) fn guard_listener(kind: &'static str, handle: Option<Handle>, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(kind, handle = ?handle, reason = %reason, "Listener fault caught during dispatch");
            counter!("dataspace_listener_faults_total", "kind" => kind).increment(1);
            false
        }
    }
}

/// Handle-to-listener tables for one session.
pub struct Dispatcher {
    subscribers: HandleRegistry<DataHandler>,
    storages: HandleRegistry<StorageHandlers>,
    evals: HandleRegistry<QueryHandler>,
    replies: HandleRegistry<ReplyHandler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: HandleRegistry::new("subscriber"),
            storages: HandleRegistry::new("storage"),
            evals: HandleRegistry::new("eval"),
            replies: HandleRegistry::new("reply"),
        }
    }

    pub fn subscribers(&self) -> &HandleRegistry<DataHandler> {
        &self.subscribers
    }

    pub fn storages(&self) -> &HandleRegistry<StorageHandlers> {
        &self.storages
    }

    pub fn evals(&self) -> &HandleRegistry<QueryHandler> {
        &self.evals
    }

    pub fn replies(&self) -> &HandleRegistry<ReplyHandler> {
        &self.replies
    }

    /// Deliver a sample to a subscriber.
    pub fn dispatch_data(&self, handle: Handle, sample: &Sample) {
        match self.subscribers.lookup(handle) {
            Ok(handler) => {
                guard_listener("subscriber", Some(handle), || handler(sample));
            }
            Err(e) => trace!(error = %e, path = %sample.path, "Dropping sample for released subscriber"),
        }
    }

    /// Deliver a sample to a storage.
    pub fn dispatch_storage_data(&self, handle: Handle, sample: &Sample) {
        match self.storages.lookup(handle) {
            Ok(handlers) => {
                guard_listener("storage", Some(handle), || (handlers.data)(sample));
            }
            Err(e) => trace!(error = %e, path = %sample.path, "Dropping sample for released storage"),
        }
    }

    /// Deliver a query to a storage. An unknown handle answers with no replies.
    pub fn dispatch_storage_query(&self, handle: Handle, expr: &str, optional_part: &str, sender: RepliesSender) {
        match self.storages.lookup(handle) {
            Ok(handlers) => {
                guard_listener("storage_query", Some(handle), || (handlers.query)(expr, optional_part, sender));
            }
            Err(e) => {
                trace!(error = %e, expr, "Query for released storage");
                sender.send(Vec::new());
            }
        }
    }

    /// Deliver a query to an eval. An unknown handle answers with no replies.
    pub fn dispatch_eval_query(&self, handle: Handle, expr: &str, optional_part: &str, sender: RepliesSender) {
        match self.evals.lookup(handle) {
            Ok(handler) => {
                guard_listener("eval", Some(handle), || handler(expr, optional_part, sender));
            }
            Err(e) => {
                trace!(error = %e, expr, "Query for released eval");
                sender.send(Vec::new());
            }
        }
    }

    /// Deliver a reply event. The handle is released after the final event.
    pub fn dispatch_reply(&self, handle: Handle, event: ReplyEvent) {
        let handler = match self.replies.lookup(handle) {
            Ok(handler) => handler,
            Err(e) => {
                trace!(error = %e, "Dropping reply for released query");
                return;
            }
        };
        let is_final = event.is_final();
        guard_listener("reply", Some(handle), || handler(event));
        if is_final {
            self.replies.release_if(handle, |h| Arc::ptr_eq(h, &handler));
        }
    }
}
