//! Fan-in of query replies into a consistent result.
//!
//! Replies are grouped by path and ordered by timestamp; entries with an
//! identical timestamp are duplicates of each other whatever their value.
//! A snapshot keeps only the latest entry of each path, a series keeps
//! them all.

use std::collections::BTreeMap;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::data::{Change, Data};
use crate::addressing::Path;
use crate::net::{ChangeKind, Sample};
use crate::timestamp::Timestamp;
use crate::value::{self, encoding};

/// What to do with a query reply that carries no timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingTimestampPolicy {
    /// Stamp it with the local wall clock and a zero clock id.
    #[default]
    Synthesize,
    /// Drop it.
    Reject,
}

fn dropped(reason: &'static str) {
    counter!("dataspace_dropped_replies_total", "reason" => reason).increment(1);
}

/// Decode one query reply, or `None` if it must be left out of the result.
pub(crate) fn decode_reply(sample: &Sample, policy: MissingTimestampPolicy) -> Option<Data> {
    let path = match Path::new(&sample.path) {
        Ok(path) => path,
        Err(e) => {
            warn!(path = %sample.path, error = %e, "Dropping reply with invalid path");
            dropped("invalid_path");
            return None;
        }
    };
    let encoding = sample.info.encoding.unwrap_or(encoding::RAW);
    let value = match value::decode(encoding, &sample.payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path, encoding, error = %e, "Dropping reply that failed to decode");
            dropped("decode");
            return None;
        }
    };
    let timestamp = match (sample.info.timestamp, policy) {
        (Some(ts), _) => ts,
        (None, MissingTimestampPolicy::Synthesize) => {
            warn!(path = %path, "Reply without timestamp, synthesizing one from the local clock");
            Timestamp::synthesize()
        }
        (None, MissingTimestampPolicy::Reject) => {
            warn!(path = %path, "Dropping reply without timestamp");
            dropped("missing_timestamp");
            return None;
        }
    };
    Some(Data::new(path, value, timestamp))
}

/// Decode one subscription sample, or `None` if it must not be notified.
pub(crate) fn decode_change(sample: &Sample) -> Option<Change> {
    let path = match Path::new(&sample.path) {
        Ok(path) => path,
        Err(e) => {
            warn!(path = %sample.path, error = %e, "Dropping change with invalid path");
            dropped("invalid_path");
            return None;
        }
    };
    let kind = match sample.info.kind.map(ChangeKind::try_from) {
        None => ChangeKind::Put,
        Some(Ok(kind)) => kind,
        Some(Err(unknown)) => {
            warn!(path = %path, kind = unknown, "Dropping change of unknown kind");
            dropped("unknown_kind");
            return None;
        }
    };
    let value = match kind {
        ChangeKind::Remove => None,
        ChangeKind::Put | ChangeKind::Update => {
            let encoding = sample.info.encoding.unwrap_or(encoding::RAW);
            match value::decode(encoding, &sample.payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(path = %path, encoding, error = %e, "Dropping change that failed to decode");
                    dropped("decode");
                    return None;
                }
            }
        }
    };
    Some(Change::new(path, kind, sample.info.timestamp, value))
}

/// Accumulates the decoded replies of one query.
#[derive(Debug, Default)]
pub struct ReplyAggregator {
    groups: BTreeMap<Path, Vec<Data>>,
}

impl ReplyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: Data) {
        self.groups.entry(data.path().clone()).or_default().push(data);
    }

    /// Number of entries received so far, duplicates included.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The result, ordered by path then timestamp.
    pub fn finish(self, series: bool) -> Vec<Data> {
        let mut result = Vec::new();
        for (_, mut group) in self.groups {
            group.sort_by(|a, b| a.timestamp().cmp(b.timestamp()));
            group.dedup_by(|a, b| a.timestamp() == b.timestamp());
            if series {
                result.extend(group);
            } else if let Some(latest) = group.pop() {
                result.push(latest);
            }
        }
        result
    }
}
