use anyhow::Result;
use kube::{Api, Client};
use nsm_api::NetworkServiceEndpoint;
use registry_cache::{DaemonConfig, KubeSource, NetworkServiceEndpointCache, TracingObserver};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting registry-cache-daemon...");

    if let Err(e) = run().await {
        error!("registry-cache-daemon failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}

async fn run() -> Result<()> {
    let config = DaemonConfig::from_env()?;
    debug!("Loaded configuration: {:?}", config);

    let client = Client::try_default().await?;
    let api: Api<NetworkServiceEndpoint> = match &config.namespace {
        Some(namespace) => {
            info!("Watching NetworkServiceEndpoints in namespace {}", namespace);
            Api::namespaced(client, namespace)
        }
        None => {
            info!("Watching NetworkServiceEndpoints in all namespaces");
            Api::all(client)
        }
    };
    let source = KubeSource::new(api, config.watcher_config());

    let cache = NetworkServiceEndpointCache::with_observer(Arc::new(TracingObserver));
    let handle = cache.start(&source).await?;

    let mut stats_ticker = tokio::time::interval(config.stats_interval);
    loop {
        tokio::select! {
            _ = stats_ticker.tick() => log_stats(&cache),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received, stopping cache...");
                break;
            }
        }
    }

    handle.stop();
    log_stats(&cache);

    Ok(())
}

fn log_stats(cache: &NetworkServiceEndpointCache) {
    let stats = cache.stats();
    info!(
        "Cache holds {} endpoints across {} network services",
        stats.endpoints, stats.network_services
    );
    debug!("Network services: {:?}", cache.network_services());
}
