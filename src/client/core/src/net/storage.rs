//! An in-memory storage declared through a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::dispatch::StorageHandlers;
use super::keyexpr;
use super::session::{Session, Storage};
use super::types::{ChangeKind, DataInfo, RepliesSender, Sample};
use crate::addressing::Selector;
use crate::error::Result;

/// A removed path keeps its entry with `removed` set, so a write older than
/// the removal cannot bring it back.
#[derive(Debug, Clone)]
struct StoredValue {
    payload: Vec<u8>,
    info: DataInfo,
    removed: bool,
}

type Entries = Arc<RwLock<BTreeMap<String, StoredValue>>>;

/// Keeps the latest value per path and answers queries from it.
pub struct MemoryStorage {
    session: Arc<Session>,
    storage: Storage,
    entries: Entries,
}

impl MemoryStorage {
    /// Declare a storage for every path matching `selector`.
    pub fn declare(session: Arc<Session>, selector: &Selector) -> Result<Self> {
        let entries: Entries = Arc::default();

        let on_data = {
            let entries = entries.clone();
            move |sample: &Sample| store(&entries, sample)
        };
        let on_query = {
            let entries = entries.clone();
            move |expr: &str, _optional_part: &str, sender: RepliesSender| {
                let replies: Vec<Sample> = entries
                    .read()
                    .iter()
                    .filter(|(path, v)| !v.removed && keyexpr::intersect(expr, path))
                    .map(|(path, v)| Sample::new(path.clone(), v.payload.clone(), v.info.clone()))
                    .collect();
                trace!(expr, replies = replies.len(), "Storage answering query");
                sender.send(replies);
            }
        };

        let storage = session.declare_storage(
            selector,
            StorageHandlers {
                data: Arc::new(on_data),
                query: Arc::new(on_query),
            },
        )?;
        debug!(selector = %selector, "Memory storage declared");
        Ok(Self {
            session,
            storage,
            entries,
        })
    }

    pub fn selector(&self) -> &Selector {
        self.storage.selector()
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|v| !v.removed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().values().all(|v| v.removed)
    }

    /// The stored payload and metadata for an exact path.
    pub fn get(&self, path: &str) -> Option<(Vec<u8>, DataInfo)> {
        self.entries
            .read()
            .get(path)
            .filter(|v| !v.removed)
            .map(|v| (v.payload.clone(), v.info.clone()))
    }

    pub fn undeclare(self) -> Result<()> {
        self.session.undeclare_storage(&self.storage)
    }
}

fn store(entries: &Entries, sample: &Sample) {
    let kind = sample
        .info
        .kind
        .and_then(|k| ChangeKind::try_from(k).ok())
        .unwrap_or(ChangeKind::Put);
    let mut entries = entries.write();

    // Older writes never replace newer ones.
    if let (Some(existing), Some(incoming)) = (
        entries.get(&sample.path).and_then(|v| v.info.timestamp),
        sample.info.timestamp,
    ) {
        if incoming < existing {
            trace!(path = %sample.path, "Ignoring out-of-date write");
            return;
        }
    }

    let stored = match kind {
        ChangeKind::Remove => StoredValue {
            payload: Vec::new(),
            info: sample.info.clone(),
            removed: true,
        },
        ChangeKind::Put | ChangeKind::Update => StoredValue {
            payload: sample.payload.clone(),
            info: sample.info.clone(),
            removed: false,
        },
    };
    entries.insert(sample.path.clone(), stored);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    fn sample(path: &str, payload: &[u8], time: u64, kind: ChangeKind) -> Sample {
        Sample::new(
            path,
            payload.to_vec(),
            DataInfo::new()
                .with_timestamp(Timestamp::new(time, [1; 16]))
                .with_kind(kind),
        )
    }

    #[test]
    fn test_store_keeps_latest() {
        let entries: Entries = Arc::default();
        store(&entries, &sample("/a", b"2", 20, ChangeKind::Put));
        store(&entries, &sample("/a", b"1", 10, ChangeKind::Put));
        assert_eq!(entries.read().get("/a").unwrap().payload, b"2".to_vec());
    }

    #[test]
    fn test_store_honours_remove() {
        let entries: Entries = Arc::default();
        store(&entries, &sample("/a", b"1", 10, ChangeKind::Put));
        store(&entries, &sample("/a", b"", 11, ChangeKind::Remove));
        assert!(entries.read().get("/a").unwrap().removed);
    }

    #[test]
    fn test_late_write_does_not_revive_removed_path() {
        let entries: Entries = Arc::default();
        store(&entries, &sample("/a", b"1", 10, ChangeKind::Put));
        store(&entries, &sample("/a", b"", 20, ChangeKind::Remove));
        store(&entries, &sample("/a", b"stale", 15, ChangeKind::Put));
        assert!(entries.read().get("/a").unwrap().removed);

        store(&entries, &sample("/a", b"fresh", 30, ChangeKind::Put));
        let current = entries.read().get("/a").cloned().unwrap();
        assert!(!current.removed);
        assert_eq!(current.payload, b"fresh".to_vec());
    }
}
