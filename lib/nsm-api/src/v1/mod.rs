/// API version v1 for Network Service Mesh CRDs

pub mod network_service_endpoint;

pub use network_service_endpoint::{
    NetworkServiceEndpoint, NetworkServiceEndpointSpec, NetworkServiceEndpointStatus,
};

/// API group for Network Service Mesh resources
pub const API_GROUP: &str = "networkservicemesh.io";
/// API version for Network Service Mesh resources
pub const API_VERSION: &str = "v1";
