//! A session over a transport.
//!
//! The session owns the [`Dispatcher`] shared with its transport. Every
//! declaration allocates a handle first and hands it to the transport; a
//! handle is released only once the transport has confirmed the matching
//! undeclaration.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::dispatch::{DataHandler, Dispatcher, QueryHandler, ReplyHandler, StorageHandlers};
use super::handles::HandleRegistry;
use super::transport::{Connector, Transport, TransportResult};
use super::types::{ChangeKind, Handle, SubMode};
use crate::addressing::{Path, Properties, Selector};
use crate::error::{DataspaceError, Result};
use crate::value::Encoding;

/// A declared subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscriber {
    handle: Handle,
    selector: Selector,
    mode: SubMode,
}

impl Subscriber {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn mode(&self) -> SubMode {
        self.mode
    }
}

/// A declared storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Storage {
    handle: Handle,
    selector: Selector,
}

impl Storage {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// A declared eval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Eval {
    handle: Handle,
    path: Path,
}

impl Eval {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A query whose replies are still expected.
pub struct PendingQuery {
    handle: Handle,
    handler: ReplyHandler,
}

impl PendingQuery {
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

/// An open session.
pub struct Session {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    closed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("info", &self.transport.info().to_string())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    /// Open a session through `connector`.
    pub fn open(connector: &dyn Connector, locator: Option<&str>, properties: &Properties) -> Result<Self> {
        let dispatcher = Arc::new(Dispatcher::new());
        let transport = connector
            .open(locator, properties, dispatcher.clone())
            .map_err(|e| DataspaceError::transport("Open", locator.unwrap_or("<default>"), e))?;
        info!(locator = locator.unwrap_or("<default>"), "Session opened");
        Ok(Self {
            transport,
            dispatcher,
            closed: AtomicBool::new(false),
        })
    }

    /// Close the session. Later operations fail with `SessionClosed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DataspaceError::session_closed("Close"));
        }
        self.transport
            .close()
            .map_err(|e| DataspaceError::transport("Close", "session", e))?;
        info!("Session closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Properties describing the session, such as the `peer` id.
    pub fn info(&self) -> Properties {
        self.transport.info()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.is_closed() {
            return Err(DataspaceError::session_closed(operation));
        }
        Ok(())
    }

    /// Allocate a handle, then declare it; the handle is released if the transport refuses.
    fn declare<T: Clone>(
        &self,
        operation: &'static str,
        resource: &str,
        registry: &HandleRegistry<T>,
        listener: T,
        declare: impl FnOnce(&dyn Transport, Handle) -> TransportResult<()>,
    ) -> Result<Handle> {
        self.ensure_open(operation)?;
        let handle = registry.register(listener)?;
        if let Err(e) = declare(self.transport.as_ref(), handle) {
            let _ = registry.release(handle);
            return Err(DataspaceError::transport(operation, resource, e));
        }
        debug!(operation, resource, handle, registry = registry.name(), "Declared");
        Ok(handle)
    }

    /// Undeclare, then release the handle. On transport failure the handle stays registered.
    fn undeclare<T: Clone>(
        &self,
        operation: &'static str,
        resource: &str,
        registry: &HandleRegistry<T>,
        handle: Handle,
        undeclare: impl FnOnce(&dyn Transport, Handle) -> TransportResult<()>,
    ) -> Result<()> {
        self.ensure_open(operation)?;
        if !registry.contains(handle) {
            return Err(DataspaceError::not_registered(registry.name(), resource));
        }
        undeclare(self.transport.as_ref(), handle).map_err(|e| {
            warn!(operation, resource, handle, error = %e, "Undeclaration refused, keeping local handle");
            DataspaceError::transport(operation, resource, e)
        })?;
        registry.release(handle)?;
        debug!(operation, resource, handle, "Undeclared");
        Ok(())
    }

    /// Write `payload` under `path` with the given kind, without waiting for any reply.
    pub fn write_data_wo(&self, path: &Path, payload: &[u8], encoding: Encoding, kind: ChangeKind) -> Result<()> {
        self.ensure_open("Write")?;
        self.transport
            .write_data(path.as_str(), payload, encoding, kind)
            .map_err(|e| DataspaceError::transport("Write", path.as_str(), e))
    }

    pub fn declare_subscriber(&self, selector: &Selector, mode: SubMode, handler: DataHandler) -> Result<Subscriber> {
        let expr = selector.path();
        let handle = self.declare("Subscribe", expr, self.dispatcher.subscribers(), handler, |t, h| {
            t.declare_subscriber(expr, mode, h)
        })?;
        Ok(Subscriber {
            handle,
            selector: selector.clone(),
            mode,
        })
    }

    pub fn undeclare_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        self.undeclare(
            "Unsubscribe",
            subscriber.selector.path(),
            self.dispatcher.subscribers(),
            subscriber.handle,
            |t, h| t.undeclare_subscriber(h),
        )
    }

    /// Ask the transport to deliver the data buffered for a pull-mode subscriber.
    pub fn pull(&self, subscriber: &Subscriber) -> Result<()> {
        self.ensure_open("Pull")?;
        self.transport
            .pull(subscriber.handle)
            .map_err(|e| DataspaceError::transport("Pull", subscriber.selector.path(), e))
    }

    pub fn declare_storage(&self, selector: &Selector, handlers: StorageHandlers) -> Result<Storage> {
        let expr = selector.path();
        let handle = self.declare("DeclareStorage", expr, self.dispatcher.storages(), handlers, |t, h| {
            t.declare_storage(expr, h)
        })?;
        Ok(Storage {
            handle,
            selector: selector.clone(),
        })
    }

    pub fn undeclare_storage(&self, storage: &Storage) -> Result<()> {
        self.undeclare(
            "UndeclareStorage",
            storage.selector.path(),
            self.dispatcher.storages(),
            storage.handle,
            |t, h| t.undeclare_storage(h),
        )
    }

    pub fn declare_eval(&self, path: &Path, handler: QueryHandler) -> Result<Eval> {
        let handle = self.declare("RegisterEval", path.as_str(), self.dispatcher.evals(), handler, |t, h| {
            t.declare_eval(path.as_str(), h)
        })?;
        Ok(Eval {
            handle,
            path: path.clone(),
        })
    }

    pub fn undeclare_eval(&self, eval: &Eval) -> Result<()> {
        self.undeclare(
            "UnregisterEval",
            eval.path.as_str(),
            self.dispatcher.evals(),
            eval.handle,
            |t, h| t.undeclare_eval(h),
        )
    }

    /// Send a query; `handler` sees every reply event up to and including `ReplyFinal`.
    pub fn query(&self, selector: &Selector, handler: ReplyHandler) -> Result<PendingQuery> {
        let expr = selector.path();
        let optional_part = selector.optional_part();
        let handle = self.declare("Query", expr, self.dispatcher.replies(), handler.clone(), |t, h| {
            t.query(expr, optional_part, h)
        })?;
        Ok(PendingQuery { handle, handler })
    }

    /// Stop routing replies of a pending query. Returns false if it already completed.
    pub fn cancel_query(&self, query: &PendingQuery) -> bool {
        let released = self
            .dispatcher
            .replies()
            .release_if(query.handle, |h| Arc::ptr_eq(h, &query.handler))
            .is_some();
        if released {
            debug!(handle = query.handle, "Query cancelled");
        }
        released
    }
}
