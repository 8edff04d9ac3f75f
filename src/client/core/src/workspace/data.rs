//! Results of queries and subscriptions.

use std::fmt;

use crate::addressing::Path;
use crate::net::ChangeKind;
use crate::timestamp::Timestamp;
use crate::value::Value;

/// A `(path, value, timestamp)` triple returned by a get.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    path: Path,
    value: Value,
    timestamp: Timestamp,
}

impl Data {
    pub fn new(path: Path, value: Value, timestamp: Timestamp) -> Self {
        Self { path, value, timestamp }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    pub fn into_parts(self) -> (Path, Value, Timestamp) {
        (self.path, self.value, self.timestamp)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} ({})", self.path, self.value, self.timestamp)
    }
}

/// A change notified to a subscriber.
///
/// The timestamp is taken as-is from the write's metadata and may be
/// absent. A `Remove` carries no value.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    path: Path,
    kind: ChangeKind,
    timestamp: Option<Timestamp>,
    value: Option<Value>,
}

impl Change {
    pub fn new(path: Path, kind: ChangeKind, timestamp: Option<Timestamp>, value: Option<Value>) -> Self {
        Self {
            path,
            kind,
            timestamp,
            value,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}
