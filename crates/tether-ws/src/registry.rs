//! Single-owner connection registry.
//!
//! At most one live worker per [`ClientKey`]. When a client reconnects, the
//! new worker takes the slot and the old one is told to close in the same
//! critical section, so there is never a moment where both are registered
//! or where neither is.

use std::collections::HashMap;
use std::fmt;
use std::pin::pin;

use metrics::counter;
use parking_lot::Mutex;
use tether_core::ClientKey;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::metrics::WS_DISPLACEMENTS_TOTAL;
use crate::transport::Transport;
use crate::worker::{ConnectionWorker, WorkerConfig, WorkerHandle, WorkerHandler};

type Factory<H> = Box<dyn Fn(&ClientKey) -> H + Send + Sync>;

/// Keyed table of live workers for one connection type.
pub struct ConnectionRegistry<H: WorkerHandler> {
    config: WorkerConfig,
    factory: Factory<H>,
    workers: Mutex<HashMap<ClientKey, WorkerHandle>>,
    emptied: Notify,
}

impl<H: WorkerHandler> ConnectionRegistry<H> {
    /// Create a registry that builds a handler per connection with `factory`.
    pub fn new<F>(config: WorkerConfig, factory: F) -> Self
    where
        F: Fn(&ClientKey) -> H + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Box::new(factory),
            workers: Mutex::new(HashMap::new()),
            emptied: Notify::new(),
        }
    }

    /// Connection type served by this registry.
    pub fn connection_type(&self) -> &str {
        &self.config.connection_type
    }

    /// Worker configuration applied to every connection.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run a new worker for `key` on `transport`, displacing any current one.
    ///
    /// Resolves when the new worker's session ends. Its table entry is
    /// removed only if nothing newer has replaced it in the meantime.
    pub async fn begin_unique<T: Transport>(&self, transport: T, key: impl Into<ClientKey>) {
        let key = key.into();
        let worker = ConnectionWorker::new(key.clone(), (self.factory)(&key), &self.config);
        let handle = worker.handle().clone();

        let displaced = {
            let mut workers = self.workers.lock();
            let previous = workers.insert(key.clone(), handle.clone());
            if let Some(previous) = &previous {
                previous.close();
            }
            previous
        };
        if let Some(previous) = displaced {
            info!(
                connection_type = %self.config.connection_type,
                client_key = %key,
                displaced = %previous.id(),
                replacement = %handle.id(),
                "displacing existing connection"
            );
            counter!(WS_DISPLACEMENTS_TOTAL, "connection_type" => self.config.connection_type.clone())
                .increment(1);
        }

        worker.begin(transport).await;

        let now_empty = {
            let mut workers = self.workers.lock();
            if workers.get(&key).is_some_and(|current| current.same_worker(&handle)) {
                let _ = workers.remove(&key);
            }
            workers.is_empty()
        };
        if now_empty {
            self.emptied.notify_waiters();
        }
        debug!(client_key = %key, connection_id = %handle.id(), "worker finished");
    }

    /// Current worker for `key`.
    pub fn get(&self, key: &str) -> Option<WorkerHandle> {
        self.workers.lock().get(key).cloned()
    }

    /// Whether `key` has a registered worker.
    pub fn contains(&self, key: &str) -> bool {
        self.workers.lock().contains_key(key)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    /// Registered keys (sorted).
    pub fn keys(&self) -> Vec<ClientKey> {
        let mut keys: Vec<ClientKey> = self.workers.lock().keys().cloned().collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    /// Ask every registered worker to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let workers = self.workers.lock();
        for handle in workers.values() {
            handle.close();
        }
        workers.len()
    }

    /// Wait until no worker is registered.
    pub async fn drained(&self) {
        loop {
            let mut notified = pin!(self.emptied.notified());
            let _ = notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl<H: WorkerHandler> fmt::Debug for ConnectionRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_type", &self.config.connection_type)
            .field("workers", &self.len())
            .finish_non_exhaustive()
    }
}
