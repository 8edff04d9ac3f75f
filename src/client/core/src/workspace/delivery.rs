//! Where listener and eval code runs.

use std::thread;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::error;

use crate::net::dispatch::guard_listener;

/// Execution context for listener and eval invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Run on the transport's delivery thread. Listeners must not block or
    /// call back into the session.
    #[default]
    Inline,
    /// Run each delivery as its own unit of work.
    Detached,
}

/// Applies a [`DeliveryMode`] at every dispatch point of a workspace.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    mode: DeliveryMode,
}

impl Executor {
    pub fn new(mode: DeliveryMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Detached jobs go to the blocking pool of the runtime the caller is
    /// running on, otherwise to a fresh named thread.
    pub fn execute(&self, kind: &'static str, job: impl FnOnce() + Send + 'static) {
        if self.mode == DeliveryMode::Inline {
            job();
            return;
        }
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || {
                    guard_listener(kind, None, job);
                });
            }
            Err(_) => {
                let spawned = thread::Builder::new()
                    .name(format!("dataspace-{}", kind))
                    .spawn(move || {
                        guard_listener(kind, None, job);
                    });
                if let Err(e) = spawned {
                    error!(kind, error = %e, "Failed to spawn detached delivery");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_on_caller_thread() {
        let executor = Executor::new(DeliveryMode::Inline);
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        executor.execute("test", move || tx.send(thread::current().id()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn test_detached_runs_elsewhere() {
        let executor = Executor::new(DeliveryMode::Detached);
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        executor.execute("test", move || tx.send(thread::current().id()).unwrap());
        assert_ne!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), caller);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detached_uses_runtime_blocking_pool() {
        let executor = Executor::new(DeliveryMode::Detached);
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute("test", move || {
            let _ = tx.send(Handle::try_current().is_ok());
        });
        assert!(rx.await.unwrap());
    }

    #[test]
    fn test_detached_outlives_the_building_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let executor = runtime.block_on(async { Executor::new(DeliveryMode::Detached) });
        drop(runtime);

        let (tx, rx) = mpsc::channel();
        executor.execute("test", move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_mode_from_config_text() {
        let mode: DeliveryMode = serde_json::from_str("\"detached\"").unwrap();
        assert_eq!(mode, DeliveryMode::Detached);
    }
}
