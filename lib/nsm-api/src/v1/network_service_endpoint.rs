use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// NetworkServiceEndpoint is an endpoint that provides a network service.
/// It is registered by the Network Service Manager that controls it.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networkservicemesh.io",
    version = "v1",
    kind = "NetworkServiceEndpoint",
    plural = "networkserviceendpoints",
    shortname = "nse",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    status = "NetworkServiceEndpointStatus",
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.networkServiceName"}"#,
    printcolumn = r#"{"name":"NSM","type":"string","jsonPath":".spec.nsmName"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkServiceEndpointSpec {
    /// Name of the network service this endpoint provides
    #[serde(default)]
    pub network_service_name: String,

    /// Payload carried by the service, e.g. "IP" or "Ethernet"
    #[serde(default)]
    pub payload: String,

    /// Name of the Network Service Manager that owns this endpoint
    #[serde(default)]
    pub nsm_name: String,

    /// Labels used for endpoint selection
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Status of a NetworkServiceEndpoint
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkServiceEndpointStatus {
    /// Lifecycle state reported by the manager, e.g. "RUNNING"
    #[serde(default)]
    pub state: String,
}

impl NetworkServiceEndpoint {
    /// Name of the network service this endpoint belongs to
    pub fn network_service_name(&self) -> &str {
        &self.spec.network_service_name
    }

    /// Name of the manager controlling this endpoint
    pub fn nsm_name(&self) -> &str {
        &self.spec.nsm_name
    }
}
