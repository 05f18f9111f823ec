//! Change-notification sources feeding the resource cache

use crate::{CacheError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Identifies the kind of resource a cache subscribes to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single change notification for a resource
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceEvent<R> {
    /// The resource was created or updated
    Applied(R),
    /// The resource was deleted; its final state is known
    Deleted(R),
    /// The resource was deleted while unobserved; only its key is known
    Tombstone(String),
}

/// A source of change notifications for one resource kind.
///
/// Implementations own delivery order, resync and reconnect. `subscribe`
/// either returns a live stream or fails; it never returns a half-established
/// subscription.
#[async_trait]
pub trait NotificationSource<R: Send + 'static>: Send + Sync {
    /// Subscribe to changes for `kind`
    async fn subscribe(&self, kind: &ResourceKind) -> Result<BoxStream<'static, ResourceEvent<R>>>;
}

/// In-process notification source backed by a Tokio channel.
///
/// Supports exactly one subscription.
pub struct ChannelSource<R> {
    kind: ResourceKind,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ResourceEvent<R>>>>,
}

impl<R> ChannelSource<R> {
    /// Create a source for `kind` along with the sender that feeds it
    pub fn new(kind: ResourceKind) -> (mpsc::UnboundedSender<ResourceEvent<R>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let source = Self {
            kind,
            receiver: Mutex::new(Some(receiver)),
        };
        (sender, source)
    }
}

#[async_trait]
impl<R: Send + 'static> NotificationSource<R> for ChannelSource<R> {
    async fn subscribe(&self, kind: &ResourceKind) -> Result<BoxStream<'static, ResourceEvent<R>>> {
        if *kind != self.kind {
            return Err(CacheError::Subscription(format!(
                "resource kind mismatch: source serves {}, requested {}",
                self.kind, kind
            )));
        }

        let receiver = self
            .receiver
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| {
                CacheError::Subscription(format!("channel source for {} already subscribed", kind))
            })?;

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed())
    }
}
