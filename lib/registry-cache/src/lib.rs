//! In-memory registry cache for Network Service Mesh resources
//!
//! This library provides:
//! - A generic resource cache engine that turns a change-notification stream
//!   into add/delete callbacks
//! - A NetworkServiceEndpoint index keyed by name and grouped by network service
//! - A Kubernetes watch source and an in-process channel source

pub mod cache;
pub mod config;
pub mod error;
pub mod kube_source;
pub mod nse_cache;
pub mod observer;
pub mod source;

pub use cache::{CacheConfig, CacheHandle, ResourceCache};
pub use config::DaemonConfig;
pub use error::{CacheError, Result};
pub use kube_source::KubeSource;
pub use nse_cache::{nse_key, CacheStats, NetworkServiceEndpointCache};
pub use observer::{MutationObserver, NoopObserver, TracingObserver};
pub use source::{ChannelSource, NotificationSource, ResourceEvent, ResourceKind};
