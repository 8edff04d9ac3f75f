//! The workspace: put/get/subscribe/eval over a session, rooted at a path.
//!
//! Relative paths and selectors are resolved against the workspace root.
//! A get fans a query out through the session and reconciles the replies
//! with [`aggregate::ReplyAggregator`]; subscriptions and evals run their
//! callbacks through the workspace [`Executor`].

pub mod aggregate;
pub mod data;
pub mod delivery;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace, warn};

use crate::addressing::{Path, Properties, Selector};
use crate::config::WorkspaceConfig;
use crate::error::{DataspaceError, ErrorCode, Result};
use crate::net::{
    ChangeKind, DataHandler, DataInfo, Eval, Handle, PendingQuery, QueryHandler, RepliesSender,
    ReplyEvent, ReplyHandler, Sample, Session, SubMode, Subscriber,
};
use crate::value::{encoding, Value};

pub use aggregate::{MissingTimestampPolicy, ReplyAggregator};
pub use data::{Change, Data};
pub use delivery::{DeliveryMode, Executor};

/// Identifies a subscription made through a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Handle);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Releases the reply handle of a get that did not run to completion.
struct CancelOnDrop {
    session: Arc<Session>,
    pending: Option<PendingQuery>,
}

impl CancelOnDrop {
    fn disarm(mut self) {
        self.pending = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            if self.session.cancel_query(&pending) {
                debug!(handle = pending.handle(), "Get abandoned before its final reply");
            }
        }
    }
}

/// A view of the data space rooted at a path.
pub struct Workspace {
    root: Path,
    session: Arc<Session>,
    executor: Executor,
    config: WorkspaceConfig,
    evals: DashMap<Path, Eval>,
    subscriptions: DashMap<SubscriptionId, Subscriber>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("delivery", &self.executor.mode())
            .field("evals", &self.evals.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl Workspace {
    pub fn new(root: Path, session: Arc<Session>, config: WorkspaceConfig) -> Self {
        debug!(root = %root, delivery = ?config.delivery, "Workspace created");
        Self {
            root,
            session,
            executor: Executor::new(config.delivery),
            config,
            evals: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn delivery(&self) -> DeliveryMode {
        self.executor.mode()
    }

    fn to_absolute(&self, path: &Path) -> Result<Path> {
        if path.is_relative() {
            path.add_prefix(&self.root)
        } else {
            Ok(path.clone())
        }
    }

    fn to_absolute_selector(&self, selector: &Selector) -> Selector {
        if selector.is_relative() {
            selector.add_prefix(&self.root)
        } else {
            selector.clone()
        }
    }

    fn write(&self, path: &Path, payload: &[u8], encoding: u8, kind: ChangeKind) -> Result<()> {
        let path = self.to_absolute(path)?;
        debug!(path = %path, encoding, kind = %kind, "Write");
        self.session.write_data_wo(&path, payload, encoding, kind)
    }

    /// Publish `value` under `path`.
    pub fn put(&self, path: &Path, value: &Value) -> Result<()> {
        self.write(path, &value.encode(), value.encoding(), ChangeKind::Put)
    }

    /// Publish `value` as an update of the value under `path`.
    pub fn update(&self, path: &Path, value: &Value) -> Result<()> {
        self.write(path, &value.encode(), value.encoding(), ChangeKind::Update)
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        self.write(path, &[], encoding::RAW, ChangeKind::Remove)
    }

    /// Query the data space.
    ///
    /// Returns the latest entry per path, or every entry per path in time
    /// order when the selector's properties ask for a time series
    /// (`starttime...` / `stoptime...`). Uses the configured query timeout.
    pub async fn get(&self, selector: &Selector) -> Result<Vec<Data>> {
        match self.config.query_timeout {
            Some(timeout) => self.get_with_timeout(selector, timeout).await,
            None => self.collect(selector).await,
        }
    }

    /// Like [`Workspace::get`] with an explicit deadline.
    pub async fn get_with_timeout(&self, selector: &Selector, timeout: Duration) -> Result<Vec<Data>> {
        match tokio::time::timeout(timeout, self.collect(selector)).await {
            Ok(result) => result,
            Err(elapsed) => {
                let error = DataspaceError::from(elapsed).with_context("selector", selector.to_string());
                error.log();
                Err(error)
            }
        }
    }

    #[instrument(level = "debug", skip(self, selector), fields(selector = %selector))]
    async fn collect(&self, selector: &Selector) -> Result<Vec<Data>> {
        let selector = self.to_absolute_selector(selector);
        let series = selector.is_for_series();
        let policy = self.config.missing_timestamp;

        let (tx, rx) = oneshot::channel::<ReplyAggregator>();
        let tx = Mutex::new(Some(tx));
        let aggregator = Mutex::new(ReplyAggregator::new());
        let handler: ReplyHandler = Arc::new(move |event: ReplyEvent| match event {
            ReplyEvent::StorageData(sample) | ReplyEvent::EvalData(sample) => {
                trace!(path = %sample.path, "Reply data");
                if let Some(data) = aggregate::decode_reply(&sample, policy) {
                    aggregator.lock().push(data);
                }
            }
            ReplyEvent::StorageFinal | ReplyEvent::EvalFinal => trace!("Source final"),
            ReplyEvent::ReplyFinal => {
                let collected = std::mem::take(&mut *aggregator.lock());
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(collected);
                }
            }
        });

        let pending = self.session.query(&selector, handler)?;
        let guard = CancelOnDrop {
            session: self.session.clone(),
            pending: Some(pending),
        };
        let collected = rx.await.map_err(|_| {
            DataspaceError::new(ErrorCode::QueryCancelled, "Query ended without a final reply")
                .with_context("selector", selector.to_string())
        })?;
        guard.disarm();

        let result = collected.finish(series);
        debug!(entries = result.len(), series, "Get complete");
        Ok(result)
    }

    /// Subscribe to changes matching `selector`.
    ///
    /// `listener` receives each change as a one-element batch.
    pub fn subscribe<F>(&self, selector: &Selector, listener: F) -> Result<SubscriptionId>
    where
        F: Fn(Vec<Change>) + Send + Sync + 'static,
    {
        let selector = self.to_absolute_selector(selector);
        let listener = Arc::new(listener);
        let executor = self.executor.clone();
        let handler: DataHandler = Arc::new(move |sample: &Sample| {
            let Some(change) = aggregate::decode_change(sample) else {
                return;
            };
            let listener = listener.clone();
            executor.execute("subscriber", move || listener(vec![change]));
        });

        let subscriber = self.session.declare_subscriber(&selector, SubMode::Push, handler)?;
        let id = SubscriptionId(subscriber.handle());
        self.subscriptions.insert(id, subscriber);
        debug!(selector = %selector, subscription = %id, "Subscribed");
        Ok(id)
    }

    /// Stop future deliveries for a subscription.
    ///
    /// On transport failure the subscription stays registered here and the
    /// call can be retried.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let subscriber = self
            .subscriptions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DataspaceError::not_registered("subscription", id.to_string()))?;
        self.session.undeclare_subscriber(&subscriber)?;
        self.subscriptions.remove(&id);
        debug!(subscription = %id, "Unsubscribed");
        Ok(())
    }

    /// Answer queries on `path` by computing a value on demand.
    ///
    /// `eval` receives the absolute path and the `key=value` properties of
    /// the query's selector.
    pub fn register_eval<F>(&self, path: &Path, eval: F) -> Result<()>
    where
        F: Fn(&Path, &Properties) -> Value + Send + Sync + 'static,
    {
        let path = self.to_absolute(path)?;
        if self.evals.contains_key(&path) {
            return Err(eval_conflict(&path));
        }

        let eval = Arc::new(eval);
        let executor = self.executor.clone();
        let eval_path = path.clone();
        let handler: QueryHandler = Arc::new(move |expr: &str, optional_part: &str, sender: RepliesSender| {
            let properties = query_properties(expr, optional_part);
            let eval = eval.clone();
            let path = eval_path.clone();
            executor.execute("eval", move || {
                let value = eval(&path, &properties);
                let info = DataInfo::new()
                    .with_encoding(value.encoding())
                    .with_kind(ChangeKind::Put);
                sender.send(vec![Sample::new(path.as_str(), value.encode(), info)]);
            });
        });

        let declared = self.session.declare_eval(&path, handler)?;
        match self.evals.entry(path) {
            Entry::Vacant(slot) => {
                debug!(path = %slot.key(), "Eval registered");
                slot.insert(declared);
                Ok(())
            }
            Entry::Occupied(slot) => {
                let path = slot.key().clone();
                drop(slot);
                if let Err(e) = self.session.undeclare_eval(&declared) {
                    warn!(path = %path, error = %e, "Failed to undo concurrent eval registration");
                }
                Err(eval_conflict(&path))
            }
        }
    }

    /// Stop answering queries on `path`.
    ///
    /// On transport failure the eval stays registered here and the call can
    /// be retried.
    pub fn unregister_eval(&self, path: &Path) -> Result<()> {
        let path = self.to_absolute(path)?;
        let eval = self
            .evals
            .get(&path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DataspaceError::not_registered("eval", path.as_str()))?;
        self.session.undeclare_eval(&eval)?;
        self.evals.remove(&path);
        debug!(path = %path, "Eval unregistered");
        Ok(())
    }

    /// Paths with a registered eval.
    pub fn eval_paths(&self) -> Vec<Path> {
        let mut paths: Vec<Path> = self.evals.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Undeclare every subscription and eval. Entries whose undeclaration
    /// fails stay registered; the first error is returned.
    pub fn close(&self) -> Result<()> {
        let mut first_error = None;
        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Err(e) = self.unsubscribe(id) {
                first_error.get_or_insert(e);
            }
        }
        for path in self.eval_paths() {
            if let Err(e) = self.unregister_eval(&path) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn eval_conflict(path: &Path) -> DataspaceError {
    DataspaceError::new(
        ErrorCode::RegistrationConflict,
        format!("An eval is already registered on {}", path),
    )
    .with_context("path", path.as_str())
}

/// The `key=value` properties of the selector a query was sent with.
fn query_properties(expr: &str, optional_part: &str) -> Properties {
    if optional_part.is_empty() {
        return Properties::new();
    }
    match Selector::new(format!("{}?{}", expr, optional_part)) {
        Ok(selector) => Properties::parse_assignments(selector.properties()),
        Err(e) => {
            warn!(expr, optional_part, error = %e, "Unparsable query selector, evaluating without properties");
            Properties::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_properties() {
        let props = query_properties("/a/*", "x>1(n=3;flag)#frag");
        assert_eq!(props.get("n"), Some("3"));
        assert!(!props.contains_key("flag"));
        assert!(query_properties("/a", "").is_empty());
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId(4).to_string(), "sub-4");
    }
}
