//! Types exchanged with the transport collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;
use crate::value::Encoding;

/// Opaque numeric token identifying a registered listener.
pub type Handle = u64;

/// Kind of a write, carried as a byte in [`DataInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum ChangeKind {
    Put = 0,
    Update = 1,
    Remove = 2,
}

impl ChangeKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ChangeKind {
    type Error = u8;

    fn try_from(kind: u8) -> Result<Self, u8> {
        match kind {
            0 => Ok(ChangeKind::Put),
            1 => Ok(ChangeKind::Update),
            2 => Ok(ChangeKind::Remove),
            other => Err(other),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Put => f.write_str("PUT"),
            ChangeKind::Update => f.write_str("UPDATE"),
            ChangeKind::Remove => f.write_str("REMOVE"),
        }
    }
}

/// Metadata attached to a sample. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataInfo {
    pub timestamp: Option<Timestamp>,
    pub encoding: Option<Encoding>,
    pub kind: Option<u8>,
}

impl DataInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind.as_u8());
        self
    }
}

/// A `(path, payload, metadata)` triple as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: String,
    pub payload: Vec<u8>,
    pub info: DataInfo,
}

impl Sample {
    pub fn new(path: impl Into<String>, payload: Vec<u8>, info: DataInfo) -> Self {
        Self {
            path: path.into(),
            payload,
            info,
        }
    }
}

/// One event delivered to a query's reply handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    StorageData(Sample),
    StorageFinal,
    EvalData(Sample),
    EvalFinal,
    /// All replies received; the last event of a query.
    ReplyFinal,
}

impl ReplyEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, ReplyEvent::ReplyFinal)
    }

    pub fn sample(&self) -> Option<&Sample> {
        match self {
            ReplyEvent::StorageData(s) | ReplyEvent::EvalData(s) => Some(s),
            _ => None,
        }
    }
}

/// How a subscriber receives data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubMode {
    /// Data is delivered as it is written.
    #[default]
    Push,
    /// Data is buffered by the transport until the subscriber pulls.
    Pull,
}

/// Sends the replies to one storage or eval query.
///
/// Replies go out exactly once. A sender dropped before [`RepliesSender::send`]
/// sends an empty reply set, so the querier always gets its final event.
pub struct RepliesSender {
    sink: Option<Box<dyn FnOnce(Vec<Sample>) + Send>>,
}

impl RepliesSender {
    pub fn new(sink: impl FnOnce(Vec<Sample>) + Send + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    pub fn send(mut self, replies: Vec<Sample>) {
        if let Some(sink) = self.sink.take() {
            sink(replies);
        }
    }
}

impl Drop for RepliesSender {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            tracing::debug!("Replies sender dropped unused, sending empty reply set");
            sink(Vec::new());
        }
    }
}

impl fmt::Debug for RepliesSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepliesSender")
            .field("sent", &self.sink.is_none())
            .finish()
    }
}
