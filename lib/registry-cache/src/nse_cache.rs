//! NetworkServiceEndpoint cache indexed by name and by network service

use crate::cache::{CacheConfig, CacheHandle, ResourceCache};
use crate::kube_source::object_key;
use crate::observer::{MutationObserver, NoopObserver};
use crate::source::{NotificationSource, ResourceKind};
use crate::Result;
use kube::Resource;
use nsm_api::NetworkServiceEndpoint;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Key of an endpoint in the cache: `namespace/name`, or `name` when the
/// endpoint carries no namespace.
///
/// Panics if the endpoint has no name. A nameless endpoint cannot be indexed
/// without breaking key uniqueness.
pub fn nse_key(nse: &NetworkServiceEndpoint) -> String {
    if nse.metadata.name.is_none() {
        panic!("NetworkServiceEndpoint without metadata.name cannot be cached");
    }
    object_key(nse)
}

fn has_key(nse: &NetworkServiceEndpoint, key: &str) -> bool {
    let Some(name) = nse.metadata.name.as_deref() else {
        return false;
    };
    match nse.metadata.namespace.as_deref() {
        Some(namespace) => {
            key.strip_prefix(namespace).and_then(|rest| rest.strip_prefix('/')) == Some(name)
        }
        None => key == name,
    }
}

/// Point-in-time counts of cache contents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub endpoints: usize,
    pub network_services: usize,
}

/// Both indices, guarded together so a mutation is observed as a unit
#[derive(Default)]
struct Indices {
    // namespace/name -> endpoint
    by_name: HashMap<String, Arc<NetworkServiceEndpoint>>,
    // network service name -> endpoints, in insertion order, never empty
    by_network_service: HashMap<String, Vec<Arc<NetworkServiceEndpoint>>>,
}

impl Indices {
    fn apply(&mut self, key: String, nse: Arc<NetworkServiceEndpoint>) {
        let network_service = nse.network_service_name();
        let previous = self
            .by_name
            .get(&key)
            .map(|stored| stored.network_service_name().to_string());

        match previous {
            None => self.append(network_service, nse.clone()),
            Some(previous) if previous == network_service => {
                if let Some(slot) = self
                    .by_network_service
                    .get_mut(&previous)
                    .and_then(|endpoints| endpoints.iter_mut().find(|e| has_key(e, &key)))
                {
                    *slot = nse.clone();
                }
            }
            Some(previous) => {
                self.remove_from_group(&previous, &key);
                self.append(network_service, nse.clone());
            }
        }

        self.by_name.insert(key, nse);
    }

    fn remove(&mut self, key: &str) -> Option<Arc<NetworkServiceEndpoint>> {
        let nse = self.by_name.remove(key)?;
        self.remove_from_group(nse.network_service_name(), key);
        Some(nse)
    }

    fn append(&mut self, network_service: &str, nse: Arc<NetworkServiceEndpoint>) {
        self.by_network_service
            .entry(network_service.to_string())
            .or_default()
            .push(nse);
    }

    fn remove_from_group(&mut self, network_service: &str, key: &str) {
        let Some(endpoints) = self.by_network_service.get_mut(network_service) else {
            return;
        };
        if let Some(index) = endpoints.iter().position(|e| has_key(e, key)) {
            endpoints.remove(index);
        }
        if endpoints.is_empty() {
            self.by_network_service.remove(network_service);
        }
    }
}

/// NetworkServiceEndpointCache mirrors NetworkServiceEndpoint resources.
///
/// Endpoints are indexed by name and grouped by network service name. Reads
/// share a lock; each add or delete updates both indices under one exclusive
/// lock. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct NetworkServiceEndpointCache {
    cache: ResourceCache<NetworkServiceEndpoint>,
    indices: Arc<RwLock<Indices>>,
}

impl NetworkServiceEndpointCache {
    pub fn new() -> Self {
        Self::with_observer(Arc::new(NoopObserver))
    }

    /// Create a cache that reports every mutation to `observer`
    pub fn with_observer(observer: Arc<dyn MutationObserver<NetworkServiceEndpoint>>) -> Self {
        let indices = Arc::new(RwLock::new(Indices::default()));

        let added_indices = indices.clone();
        let added_observer = observer.clone();
        let deleted_indices = indices.clone();
        let deleted_observer = observer;

        let config = CacheConfig {
            key_fn: nse_key,
            resource_added: Arc::new(move |nse: NetworkServiceEndpoint| {
                added_observer.before_add(&nse);
                let key = nse_key(&nse);
                let nse = Arc::new(nse);
                write(&added_indices).apply(key, nse.clone());
                added_observer.after_add(&nse);
            }),
            resource_deleted: Arc::new(move |key: &str| {
                deleted_observer.before_delete(key);
                let removed = write(&deleted_indices).remove(key).is_some();
                deleted_observer.after_delete(key, removed);
            }),
            resource_kind: ResourceKind::new(NetworkServiceEndpoint::kind(&())),
        };

        Self {
            cache: ResourceCache::new(config),
            indices,
        }
    }

    /// Get an endpoint by key (`namespace/name`)
    pub fn get(&self, key: &str) -> Option<Arc<NetworkServiceEndpoint>> {
        read(&self.indices).by_name.get(key).cloned()
    }

    /// Get the endpoints providing a network service, in index order.
    ///
    /// Returns `None` if no endpoint provides the service.
    pub fn get_by_network_service(
        &self,
        network_service_name: &str,
    ) -> Option<Vec<Arc<NetworkServiceEndpoint>>> {
        read(&self.indices)
            .by_network_service
            .get(network_service_name)
            .cloned()
    }

    /// Get the endpoints controlled by a Network Service Manager.
    ///
    /// Scans every cached endpoint; the result is unordered.
    pub fn get_by_network_service_manager(&self, nsm_name: &str) -> Vec<Arc<NetworkServiceEndpoint>> {
        read(&self.indices)
            .by_name
            .values()
            .filter(|nse| nse.nsm_name() == nsm_name)
            .cloned()
            .collect()
    }

    /// Add or update an endpoint
    pub fn add(&self, nse: NetworkServiceEndpoint) {
        self.cache.add(nse);
    }

    /// Delete an endpoint by key. Unknown keys are ignored.
    pub fn delete(&self, key: &str) {
        self.cache.delete(key);
    }

    /// Start mirroring endpoints from `source`
    pub async fn start<S>(&self, source: &S) -> Result<CacheHandle>
    where
        S: NotificationSource<NetworkServiceEndpoint> + ?Sized,
    {
        self.cache.start(source).await
    }

    /// Number of cached endpoints
    pub fn len(&self) -> usize {
        read(&self.indices).by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all network services with at least one endpoint, sorted
    pub fn network_services(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.indices)
            .by_network_service
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> CacheStats {
        let indices = read(&self.indices);
        CacheStats {
            endpoints: indices.by_name.len(),
            network_services: indices.by_network_service.len(),
        }
    }

    /// Panics unless both indices agree, checked under one read lock
    #[cfg(test)]
    fn assert_consistent(&self) {
        let indices = read(&self.indices);
        let mut grouped = 0;
        for (network_service, endpoints) in &indices.by_network_service {
            assert!(!endpoints.is_empty(), "empty group {:?}", network_service);
            for nse in endpoints {
                let key = nse_key(nse);
                let stored = indices
                    .by_name
                    .get(&key)
                    .unwrap_or_else(|| panic!("{} grouped but not cached", key));
                assert_eq!(stored.network_service_name(), network_service.as_str());
                assert!(Arc::ptr_eq(stored, nse), "stale entry for {}", key);
            }
            grouped += endpoints.len();
        }
        assert_eq!(grouped, indices.by_name.len());
    }
}

impl Default for NetworkServiceEndpointCache {
    fn default() -> Self {
        Self::new()
    }
}

// A poisoned lock means a mutation panicked halfway; the indices may disagree.
fn read(indices: &RwLock<Indices>) -> RwLockReadGuard<'_, Indices> {
    indices.read().expect("endpoint index lock poisoned")
}

fn write(indices: &RwLock<Indices>) -> RwLockWriteGuard<'_, Indices> {
    indices.write().expect("endpoint index lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChannelSource, ResourceEvent};
    use nsm_api::NetworkServiceEndpointSpec;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn nse(name: &str, network_service: &str, nsm: &str) -> NetworkServiceEndpoint {
        NetworkServiceEndpoint::new(
            name,
            NetworkServiceEndpointSpec {
                network_service_name: network_service.to_string(),
                nsm_name: nsm.to_string(),
                ..Default::default()
            },
        )
    }

    fn namespaced_nse(
        namespace: &str,
        name: &str,
        network_service: &str,
        nsm: &str,
    ) -> NetworkServiceEndpoint {
        let mut nse = nse(name, network_service, nsm);
        nse.metadata.namespace = Some(namespace.to_string());
        nse
    }

    fn names(endpoints: &[Arc<NetworkServiceEndpoint>]) -> Vec<String> {
        endpoints.iter().map(|e| nse_key(e)).collect()
    }

    fn group(cache: &NetworkServiceEndpointCache, network_service: &str) -> Option<Vec<String>> {
        cache
            .get_by_network_service(network_service)
            .map(|endpoints| names(&endpoints))
    }

    #[test]
    fn test_add_and_delete_scenario() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "svcA", "nsm1"));
        cache.add(nse("b", "svcA", "nsm2"));
        assert_eq!(group(&cache, "svcA"), Some(vec!["a".to_string(), "b".to_string()]));

        cache.delete("a");
        assert_eq!(group(&cache, "svcA"), Some(vec!["b".to_string()]));
        assert_eq!(names(&cache.get_by_network_service_manager("nsm2")), vec!["b"]);

        cache.delete("b");
        assert_eq!(group(&cache, "svcA"), None);
        assert!(cache.is_empty());
        cache.assert_consistent();
    }

    #[test]
    fn test_get_returns_latest_value() {
        let cache = NetworkServiceEndpointCache::new();
        assert!(cache.get("a").is_none());

        cache.add(nse("a", "svcA", "nsm1"));
        cache.add(nse("a", "svcA", "nsm2"));

        assert_eq!(cache.get("a").unwrap().nsm_name(), "nsm2");
        assert_eq!(cache.len(), 1);
        assert_eq!(group(&cache, "svcA"), Some(vec!["a".to_string()]));
        assert_eq!(
            cache.get_by_network_service("svcA").unwrap()[0].nsm_name(),
            "nsm2"
        );
        cache.assert_consistent();
    }

    #[test]
    fn test_update_preserves_position() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "svcA", "nsm1"));
        cache.add(nse("b", "svcA", "nsm1"));
        cache.add(nse("c", "svcA", "nsm1"));

        cache.add(nse("b", "svcA", "nsm9"));

        assert_eq!(
            group(&cache, "svcA"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(cache.get_by_network_service("svcA").unwrap()[1].nsm_name(), "nsm9");
        cache.assert_consistent();
    }

    #[test]
    fn test_update_relocates_between_network_services() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "svcA", "nsm1"));
        cache.add(nse("b", "svcA", "nsm1"));
        cache.add(nse("c", "svcB", "nsm1"));

        cache.add(nse("a", "svcB", "nsm1"));
        assert_eq!(group(&cache, "svcA"), Some(vec!["b".to_string()]));
        assert_eq!(group(&cache, "svcB"), Some(vec!["c".to_string(), "a".to_string()]));

        cache.add(nse("b", "svcC", "nsm1"));
        assert_eq!(group(&cache, "svcA"), None);
        assert_eq!(cache.network_services(), vec!["svcB", "svcC"]);
        cache.assert_consistent();
    }

    #[test]
    fn test_same_name_in_different_namespaces() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(namespaced_nse("ns1", "x", "svcA", "nsm1"));
        cache.add(namespaced_nse("ns2", "x", "svcB", "nsm1"));

        assert_eq!(cache.len(), 2);
        assert_eq!(group(&cache, "svcA"), Some(vec!["ns1/x".to_string()]));
        assert_eq!(group(&cache, "svcB"), Some(vec!["ns2/x".to_string()]));
        assert!(cache.get("x").is_none());

        // Relocating one leaves the other where it was.
        cache.add(namespaced_nse("ns1", "x", "svcB", "nsm2"));
        assert_eq!(group(&cache, "svcA"), None);
        assert_eq!(
            group(&cache, "svcB"),
            Some(vec!["ns2/x".to_string(), "ns1/x".to_string()])
        );
        assert_eq!(cache.get("ns2/x").unwrap().nsm_name(), "nsm1");
        cache.assert_consistent();

        cache.delete("x");
        assert_eq!(cache.len(), 2);

        cache.delete("ns1/x");
        assert_eq!(cache.len(), 1);
        assert_eq!(group(&cache, "svcB"), Some(vec!["ns2/x".to_string()]));
        assert_eq!(cache.get("ns2/x").unwrap().metadata.namespace.as_deref(), Some("ns2"));
        cache.assert_consistent();
    }

    #[test]
    fn test_empty_network_service_name_is_a_group() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "", "nsm1"));
        assert_eq!(group(&cache, ""), Some(vec!["a".to_string()]));

        cache.delete("a");
        assert_eq!(group(&cache, ""), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let cache = NetworkServiceEndpointCache::new();
        cache.delete("missing");
        cache.add(nse("a", "svcA", "nsm1"));
        cache.add(nse("b", "svcA", "nsm1"));

        cache.delete("a");
        let stats = cache.stats();
        cache.delete("a");

        assert_eq!(cache.stats(), stats);
        assert_eq!(group(&cache, "svcA"), Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_get_by_network_service_manager() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "svcA", "nsm1"));
        cache.add(nse("b", "svcB", "nsm1"));
        cache.add(nse("c", "svcA", "nsm2"));

        let mut found = names(&cache.get_by_network_service_manager("nsm1"));
        found.sort();
        assert_eq!(found, vec!["a", "b"]);
        assert!(cache.get_by_network_service_manager("nsm3").is_empty());
    }

    #[test]
    fn test_returned_views_are_snapshots() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "svcA", "nsm1"));
        let before = cache.get_by_network_service("svcA").unwrap();

        cache.add(nse("b", "svcA", "nsm1"));
        cache.delete("a");

        assert_eq!(names(&before), vec!["a"]);
    }

    #[test]
    #[should_panic(expected = "metadata.name")]
    fn test_nameless_endpoint_panics() {
        let cache = NetworkServiceEndpointCache::new();
        let mut nameless = nse("a", "svcA", "nsm1");
        nameless.metadata.name = None;
        cache.add(nameless);
    }

    #[test]
    fn test_observer_sees_mutations() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        impl MutationObserver<NetworkServiceEndpoint> for Recorder {
            fn before_add(&self, nse: &NetworkServiceEndpoint) {
                self.0.lock().unwrap().push(format!("before_add {}", nse_key(nse)));
            }
            fn after_add(&self, nse: &NetworkServiceEndpoint) {
                self.0.lock().unwrap().push(format!("after_add {}", nse_key(nse)));
            }
            fn after_delete(&self, key: &str, removed: bool) {
                self.0.lock().unwrap().push(format!("after_delete {} {}", key, removed));
            }
        }

        let recorder = Arc::new(Recorder::default());
        let cache = NetworkServiceEndpointCache::with_observer(recorder.clone());
        cache.add(nse("a", "svcA", "nsm1"));
        cache.delete("a");
        cache.delete("a");

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "before_add a",
                "after_add a",
                "after_delete a true",
                "after_delete a false",
            ]
        );
    }

    #[tokio::test]
    async fn test_start_mirrors_source_events() {
        let cache = NetworkServiceEndpointCache::new();
        let (tx, source) = ChannelSource::new(ResourceKind::new("NetworkServiceEndpoint"));
        let handle = cache.start(&source).await.unwrap();

        tx.send(ResourceEvent::Applied(nse("a", "svcA", "nsm1"))).unwrap();
        tx.send(ResourceEvent::Applied(nse("b", "svcA", "nsm1"))).unwrap();
        tx.send(ResourceEvent::Deleted(nse("a", "svcA", "nsm1"))).unwrap();
        tx.send(ResourceEvent::Tombstone("b".to_string())).unwrap();
        tx.send(ResourceEvent::Applied(nse("c", "svcB", "nsm2"))).unwrap();

        for _ in 0..200 {
            if cache.get("c").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(group(&cache, "svcA"), None);
        assert_eq!(group(&cache, "svcB"), Some(vec!["c".to_string()]));

        handle.stop();
        let _ = tx.send(ResourceEvent::Applied(nse("d", "svcB", "nsm2")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("d").is_none());
        cache.assert_consistent();
    }

    #[tokio::test]
    async fn test_failed_start_leaves_index_untouched() {
        let cache = NetworkServiceEndpointCache::new();
        cache.add(nse("a", "svcA", "nsm1"));

        let (_tx, source) = ChannelSource::new(ResourceKind::new("NetworkService"));
        assert!(cache.start(&source).await.is_err());

        assert_eq!(cache.stats(), CacheStats { endpoints: 1, network_services: 1 });
        assert_eq!(group(&cache, "svcA"), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_concurrent_readers_see_consistent_indices() {
        let cache = NetworkServiceEndpointCache::new();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        cache.assert_consistent();
                        if let Some(endpoints) = cache.get_by_network_service("svcA") {
                            assert!(!endpoints.is_empty());
                            let unique: HashSet<_> = names(&endpoints).into_iter().collect();
                            assert_eq!(unique.len(), endpoints.len());
                        }
                        let _ = cache.get_by_network_service_manager("nsm1");
                    }
                })
            })
            .collect();

        for round in 0..2000 {
            let name = format!("nse-{}", round % 7);
            match round % 3 {
                0 => cache.add(nse(&name, "svcA", "nsm1")),
                1 => cache.add(nse(&name, "svcB", "nsm2")),
                _ => cache.delete(&name),
            }
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            reader.join().unwrap();
        }
        cache.assert_consistent();
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add { key: u8, group: u8, manager: u8 },
        Delete { key: u8 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u8..6, 0u8..3, 0u8..2).prop_map(|(key, group, manager)| Op::Add { key, group, manager }),
            1 => (0u8..6).prop_map(|key| Op::Delete { key }),
        ]
    }

    proptest! {
        #[test]
        fn prop_indices_match_model(ops in proptest::collection::vec(op(), 0..64)) {
            let cache = NetworkServiceEndpointCache::new();
            let mut model: HashMap<String, (String, String)> = HashMap::new();

            for op in ops {
                match op {
                    Op::Add { key, group, manager } => {
                        let (key, group, manager) =
                            (format!("nse-{}", key), format!("svc-{}", group), format!("nsm-{}", manager));
                        cache.add(nse(&key, &group, &manager));
                        model.insert(key, (group, manager));
                    }
                    Op::Delete { key } => {
                        let key = format!("nse-{}", key);
                        cache.delete(&key);
                        model.remove(&key);
                    }
                }
                cache.assert_consistent();
            }

            prop_assert_eq!(cache.len(), model.len());
            for (key, (group, manager)) in &model {
                let stored = cache.get(key).unwrap();
                prop_assert_eq!(stored.network_service_name(), group.as_str());
                prop_assert_eq!(stored.nsm_name(), manager.as_str());
            }

            for group in (0..3).map(|g| format!("svc-{}", g)) {
                let expected: HashSet<&String> =
                    model.iter().filter(|(_, (g, _))| *g == group).map(|(k, _)| k).collect();
                match cache.get_by_network_service(&group) {
                    None => prop_assert!(expected.is_empty()),
                    Some(endpoints) => {
                        let actual: HashSet<String> = names(&endpoints).into_iter().collect();
                        prop_assert_eq!(actual.len(), endpoints.len());
                        prop_assert_eq!(actual.iter().collect::<HashSet<_>>(), expected);
                    }
                }
            }

            for manager in (0..2).map(|m| format!("nsm-{}", m)) {
                let expected: HashSet<&String> =
                    model.iter().filter(|(_, (_, m))| *m == manager).map(|(k, _)| k).collect();
                let actual: HashSet<String> =
                    names(&cache.get_by_network_service_manager(&manager)).into_iter().collect();
                prop_assert_eq!(actual.iter().collect::<HashSet<_>>(), expected);
            }
        }
    }
}
