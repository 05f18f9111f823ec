//! Generic resource cache engine
//!
//! Bridges a [`NotificationSource`] to a pair of add/delete callbacks. The
//! engine knows nothing about the shape of the resource beyond its key.

use crate::source::{NotificationSource, ResourceEvent, ResourceKind};
use crate::Result;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Extracts the unique key of a resource
pub type KeyFn<R> = fn(&R) -> String;
/// Invoked with the resource on every create or update
pub type ResourceAddedFn<R> = Arc<dyn Fn(R) + Send + Sync>;
/// Invoked with the resource key on every removal
pub type ResourceDeletedFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Binds a key function and the two mutation callbacks to a resource kind
pub struct CacheConfig<R> {
    pub key_fn: KeyFn<R>,
    pub resource_added: ResourceAddedFn<R>,
    pub resource_deleted: ResourceDeletedFn,
    pub resource_kind: ResourceKind,
}

struct Dispatcher<R> {
    key_fn: KeyFn<R>,
    resource_added: ResourceAddedFn<R>,
    resource_deleted: ResourceDeletedFn,
}

impl<R> Dispatcher<R> {
    fn dispatch(&self, event: ResourceEvent<R>) {
        match event {
            ResourceEvent::Applied(resource) => (self.resource_added)(resource),
            ResourceEvent::Deleted(resource) => {
                let key = (self.key_fn)(&resource);
                (self.resource_deleted)(&key)
            }
            ResourceEvent::Tombstone(key) => (self.resource_deleted)(&key),
        }
    }
}

/// Serializes subscription callbacks with `stop`.
///
/// A callback runs while holding the gate, so closing the gate waits for any
/// callback in flight and every later callback observes the closed flag.
#[derive(Default)]
struct DispatchGate {
    stopped: Mutex<bool>,
}

impl DispatchGate {
    fn lock(&self) -> MutexGuard<'_, bool> {
        // The flag is a plain bool; a callback panic cannot leave it torn.
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` unless the gate is closed. Returns false if closed.
    fn run(&self, f: impl FnOnce()) -> bool {
        let stopped = self.lock();
        if *stopped {
            return false;
        }
        f();
        true
    }

    /// Close the gate. Returns true if this call closed it.
    fn close(&self) -> bool {
        let mut stopped = self.lock();
        !std::mem::replace(&mut *stopped, true)
    }

    fn is_closed(&self) -> bool {
        *self.lock()
    }
}

/// Closes the gate when the dispatch task exits, however it exits
struct CloseOnExit {
    gate: Arc<DispatchGate>,
    resource_kind: ResourceKind,
    // set once the source stream has been drained
    drained: bool,
}

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if !self.gate.close() {
            return;
        }
        if self.drained {
            warn!("Notification stream for {} ended", self.resource_kind);
        } else {
            error!("Dispatch for {} failed; subscription stopped", self.resource_kind);
        }
    }
}

/// Handle to a running subscription
#[derive(Clone)]
pub struct CacheHandle {
    resource_kind: ResourceKind,
    gate: Arc<DispatchGate>,
    task: Arc<AbortHandle>,
}

impl CacheHandle {
    /// Stop the subscription.
    ///
    /// Blocks until a callback in flight has returned; no callback is invoked
    /// for this subscription afterwards. Calling it again is a no-op. Must not
    /// be called from inside a callback.
    pub fn stop(&self) {
        if self.gate.close() {
            self.task.abort();
            info!("Stopped {} cache subscription", self.resource_kind);
        }
    }

    /// Whether the subscription has been stopped or its source has ended
    pub fn is_stopped(&self) -> bool {
        self.gate.is_closed()
    }
}

/// ResourceCache dispatches notifications for one resource kind to callbacks
pub struct ResourceCache<R> {
    dispatcher: Arc<Dispatcher<R>>,
    resource_kind: ResourceKind,
}

impl<R> Clone for ResourceCache<R> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            resource_kind: self.resource_kind.clone(),
        }
    }
}

impl<R: Send + 'static> ResourceCache<R> {
    /// Create a new cache engine from its configuration
    pub fn new(config: CacheConfig<R>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                key_fn: config.key_fn,
                resource_added: config.resource_added,
                resource_deleted: config.resource_deleted,
            }),
            resource_kind: config.resource_kind,
        }
    }

    /// Resource kind this cache subscribes to
    pub fn resource_kind(&self) -> &ResourceKind {
        &self.resource_kind
    }

    /// Add or update a resource directly, bypassing the subscription
    pub fn add(&self, resource: R) {
        self.dispatcher.dispatch(ResourceEvent::Applied(resource));
    }

    /// Delete a resource by key directly, bypassing the subscription
    pub fn delete(&self, key: &str) {
        self.dispatcher.dispatch(ResourceEvent::Tombstone(key.to_string()));
    }

    /// Subscribe to `source` and dispatch its events until stopped.
    ///
    /// Fails without side effects if the subscription cannot be established.
    /// Must be called within a Tokio runtime.
    pub async fn start<S>(&self, source: &S) -> Result<CacheHandle>
    where
        S: NotificationSource<R> + ?Sized,
    {
        let mut events = source.subscribe(&self.resource_kind).await?;
        info!("Started {} cache subscription", self.resource_kind);

        let gate = Arc::new(DispatchGate::default());
        let dispatcher = self.dispatcher.clone();
        let mut exit = CloseOnExit {
            gate: gate.clone(),
            resource_kind: self.resource_kind.clone(),
            drained: false,
        };

        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if !exit.gate.run(|| dispatcher.dispatch(event)) {
                    debug!("Dropping {} event after stop", exit.resource_kind);
                    return;
                }
            }
            exit.drained = true;
        });

        Ok(CacheHandle {
            resource_kind: self.resource_kind.clone(),
            gate,
            task: Arc::new(task.abort_handle()),
        })
    }
}
