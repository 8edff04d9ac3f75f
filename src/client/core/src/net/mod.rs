//! Session and transport plumbing.
//!
//! - [`transport`]: the traits a wire transport implements
//! - [`handles`] and [`dispatch`]: handle tables bridging transport callbacks to listeners
//! - [`session`]: declarations, writes and queries over one transport
//! - [`loopback`]: an in-process transport with wildcard routing
//! - [`storage`]: a memory storage answering queries

pub mod dispatch;
pub mod handles;
pub mod keyexpr;
pub mod loopback;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use dispatch::{DataHandler, Dispatcher, QueryHandler, ReplyHandler, StorageHandlers};
pub use handles::{HandleError, HandleRegistry};
pub use loopback::{LoopbackClock, LoopbackRouter, LoopbackTransport};
pub use session::{Eval, PendingQuery, Session, Storage, Subscriber};
pub use storage::MemoryStorage;
pub use transport::{Connector, Transport, TransportError, TransportResult};
pub use types::{ChangeKind, DataInfo, Handle, RepliesSender, ReplyEvent, Sample, SubMode};
