//! Network Service Mesh API types for Kubernetes integration
//!
//! This library defines the custom resources mirrored by the registry cache:
//! - NetworkServiceEndpoint: an endpoint providing a network service, managed by an NSM

pub mod v1;

pub use v1::{NetworkServiceEndpoint, NetworkServiceEndpointSpec, NetworkServiceEndpointStatus};
