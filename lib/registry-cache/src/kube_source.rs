//! Kubernetes watch source

use crate::source::{NotificationSource, ResourceEvent, ResourceKind};
use crate::{CacheError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use kube::api::{ListParams, ResourceExt};
use kube::{Api, Resource};
use kube_runtime::watcher::{self, watcher};
use kube_runtime::WatchStreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use tracing::{debug, warn};

/// KubeSource streams changes to one Kubernetes resource type
pub struct KubeSource<K> {
    api: Api<K>,
    config: watcher::Config,
}

impl<K> KubeSource<K> {
    /// Create a source watching `api` with the given watcher configuration
    pub fn new(api: Api<K>, config: watcher::Config) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl<K> NotificationSource<K> for KubeSource<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn subscribe(&self, kind: &ResourceKind) -> Result<BoxStream<'static, ResourceEvent<K>>> {
        let served = K::kind(&());
        if kind.as_str() != served {
            return Err(CacheError::Subscription(format!(
                "resource kind mismatch: source serves {}, requested {}",
                served, kind
            )));
        }

        // Fail here rather than in the watch loop if the CRD is missing,
        // access is denied or the apiserver is unreachable.
        self.api.list(&ListParams::default().limit(1)).await?;
        debug!("Watching {} resources", kind);

        let kind = kind.clone();
        let events = watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .filter_map(move |event| {
                let kind = kind.clone();
                async move {
                    match event {
                        Ok(event) => Some(event),
                        Err(e) => {
                            warn!("Watch error for {}: {}", kind, e);
                            None
                        }
                    }
                }
            })
            .scan(RelistTracker::default(), |tracker, event| {
                futures::future::ready(Some(tracker.translate(event)))
            })
            .flat_map(stream::iter);

        Ok(events.boxed())
    }
}

/// Cache key of a Kubernetes object: `namespace/name`, or `name` for
/// cluster-scoped objects.
pub fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(namespace) => format!("{}/{}", namespace, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Converts watcher events into cache events.
///
/// A relist (`Init` .. `InitDone`) only reports objects that still exist, so
/// keys known before the relist and not seen during it are emitted as
/// tombstones once it completes.
#[derive(Default)]
struct RelistTracker {
    known: HashSet<String>,
    relisted: Option<HashSet<String>>,
}

impl RelistTracker {
    fn translate<K: Resource>(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                self.known.insert(object_key(&obj));
                vec![ResourceEvent::Applied(obj)]
            }
            watcher::Event::Delete(obj) => {
                self.known.remove(&object_key(&obj));
                vec![ResourceEvent::Deleted(obj)]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let key = object_key(&obj);
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(key.clone());
                }
                self.known.insert(key);
                vec![ResourceEvent::Applied(obj)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let stale: Vec<String> = self
                    .known
                    .iter()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                for key in &stale {
                    self.known.remove(key);
                }
                if !stale.is_empty() {
                    debug!("Relist dropped {} stale objects", stale.len());
                }
                stale.into_iter().map(ResourceEvent::Tombstone).collect()
            }
        }
    }
}
