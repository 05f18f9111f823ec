//! Observers notified around index mutations

use nsm_api::NetworkServiceEndpoint;
use tracing::{debug, info};

/// Hooks invoked before and after each index mutation.
///
/// Hooks run outside the index lock, on the thread performing the mutation.
pub trait MutationObserver<R>: Send + Sync {
    fn before_add(&self, _resource: &R) {}

    fn after_add(&self, _resource: &R) {}

    fn before_delete(&self, _key: &str) {}

    /// `removed` is false when the key was not cached
    fn after_delete(&self, _key: &str, _removed: bool) {}
}

/// Observer that does nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl<R> MutationObserver<R> for NoopObserver {}

/// Observer that logs endpoint mutations through `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl MutationObserver<NetworkServiceEndpoint> for TracingObserver {
    fn before_add(&self, nse: &NetworkServiceEndpoint) {
        info!(
            nse = nse.metadata.name.as_deref().unwrap_or_default(),
            network_service = nse.network_service_name(),
            nsm = nse.nsm_name(),
            "Adding NSE to cache"
        );
    }

    fn after_add(&self, nse: &NetworkServiceEndpoint) {
        debug!(
            "Cached NSE {}",
            nse.metadata.name.as_deref().unwrap_or_default()
        );
    }

    fn after_delete(&self, key: &str, removed: bool) {
        if removed {
            debug!("Removed NSE {} from cache", key);
        } else {
            debug!("Delete for unknown NSE {} ignored", key);
        }
    }
}
