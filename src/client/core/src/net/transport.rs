//! The seam to the wire transport.
//!
//! A [`Connector`] opens a [`Transport`] for a session. Declarations are
//! identified by the handles allocated in the session's [`Dispatcher`]; the
//! transport calls back into the dispatcher with those handles from its own
//! threads.

use std::sync::Arc;

use thiserror::Error;

use super::dispatch::Dispatcher;
use super::types::{ChangeKind, Handle, SubMode};
use crate::addressing::Properties;
use crate::value::Encoding;

/// Failure reported by the transport collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("session is closed")]
    Closed,

    #[error("transport failure {name} (code {code})")]
    Failed { code: i32, name: String },

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("no declaration for handle {0}")]
    UnknownDeclaration(Handle),
}

impl TransportError {
    /// The collaborator's numeric failure code, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            TransportError::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// An open connection to the data space.
pub trait Transport: Send + Sync {
    /// Properties describing the session (peer id, locator, ...).
    fn info(&self) -> Properties;

    fn close(&self) -> TransportResult<()>;

    fn write_data(&self, path: &str, payload: &[u8], encoding: Encoding, kind: ChangeKind) -> TransportResult<()>;

    fn declare_subscriber(&self, expr: &str, mode: SubMode, handle: Handle) -> TransportResult<()>;

    fn undeclare_subscriber(&self, handle: Handle) -> TransportResult<()>;

    /// Deliver the data buffered for a pull-mode subscriber.
    fn pull(&self, handle: Handle) -> TransportResult<()>;

    fn declare_storage(&self, expr: &str, handle: Handle) -> TransportResult<()>;

    fn undeclare_storage(&self, handle: Handle) -> TransportResult<()>;

    fn declare_eval(&self, path: &str, handle: Handle) -> TransportResult<()>;

    fn undeclare_eval(&self, handle: Handle) -> TransportResult<()>;

    /// Fan a query out; replies come back through the reply registry under `handle`.
    fn query(&self, expr: &str, optional_part: &str, handle: Handle) -> TransportResult<()>;
}

/// Opens transports.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        locator: Option<&str>,
        properties: &Properties,
        dispatcher: Arc<Dispatcher>,
    ) -> TransportResult<Arc<dyn Transport>>;
}
