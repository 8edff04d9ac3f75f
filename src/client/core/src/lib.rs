#![allow(clippy::result_large_err)]
//! # Dataspace Core
//!
//! Client library for a distributed key-value data space addressed by
//! hierarchical paths.
//!
//! ## Architecture
//!
//! - **Addressing**: `Path`, `Selector` and `Properties` parsing and canonicalization
//! - **Timestamp**: totally ordered (time, clock id) markers used for conflict resolution
//! - **Value**: built-in value variants and the process-wide decoder registry
//! - **Net**: session, transport seam, handle registries and dispatch of transport callbacks
//! - **Workspace**: put/get/subscribe/eval with reply fan-in and last-writer-wins reconciliation
//! - **Client**: login/logout and workspace creation
//! - **Telemetry**: structured logging with credential redaction
//!
//! ## Example
//!
//! ```rust,no_run
//! use dataspace_core::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let router = LoopbackRouter::new();
//! let client = Client::login(&router, None, &Properties::new())?;
//! let ws = client.workspace(&Path::new("/demo")?);
//! ws.put(&Path::new("a")?, &Value::from("hello"))?;
//! for data in ws.get(&Selector::new("/demo/*")?).await? {
//!     println!("{}", data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod telemetry;
pub mod timestamp;
pub mod value;
pub mod workspace;

pub use error::{DataspaceError, Result, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::addressing::{Path, Properties, Selector};
    pub use crate::client::Client;
    pub use crate::config::{ClientConfig, SessionConfig, WorkspaceConfig};
    pub use crate::error::{DataspaceError, Result, ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity};
    pub use crate::net::{
        ChangeKind, Connector, LoopbackRouter, MemoryStorage, Session, SubMode, Transport,
        TransportError,
    };
    pub use crate::timestamp::Timestamp;
    pub use crate::value::{encoding, register_value_decoder, DecodeError, Encoding, Value};
    pub use crate::workspace::{
        Change, Data, DeliveryMode, MissingTimestampPolicy, SubscriptionId, Workspace,
    };
}
