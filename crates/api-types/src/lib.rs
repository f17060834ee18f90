//! Shared API type definitions
//!
//! This crate contains the wire types spoken by the supervisor: the training
//! status endpoint exposed by the pod (`/is_training`) and the
//! subset of the RunPod GraphQL schema used to manage pods.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Response of `GET /is_training` on the training control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingStatusResponse {
    /// Whether a training run is currently active
    pub training: bool,
}

/// One exposed port of a running pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Host address the port is reachable on
    pub ip: String,
    /// Whether `ip` is publicly routable
    #[serde(default)]
    pub is_ip_public: bool,
    /// Port inside the container
    pub private_port: u16,
    /// Port exposed on `ip`
    pub public_port: u16,
    /// Protocol, `tcp` or `http`
    #[serde(rename = "type")]
    pub protocol: String,
}

/// Runtime section of a pod; absent while the container is still starting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRuntime {
    #[serde(default)]
    pub uptime_in_seconds: Option<u64>,
    #[serde(default)]
    pub ports: Option<Vec<PortMapping>>,
}

/// Pod record as returned by the RunPod API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desired_status: Option<String>,
    #[serde(default)]
    pub image_name: Option<String>,
    #[serde(default)]
    pub runtime: Option<PodRuntime>,
}

/// Accelerator type offered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuType {
    /// Identifier used when creating a pod
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub memory_in_gb: Option<f64>,
}

/// Environment entry of a pod creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Input of the `podFindAndDeployOnDemand` mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodInput {
    pub name: String,
    pub image_name: String,
    pub gpu_type_id: String,
    pub cloud_type: String,
    pub gpu_count: u32,
    pub volume_in_gb: u32,
    pub container_disk_in_gb: u32,
    pub support_public_ip: bool,
    /// Comma separated `port/protocol` list, e.g. `8000/http,22/tcp`
    pub ports: String,
    pub env: Vec<EnvVar>,
}

impl CreatePodInput {
    /// Environment as a map, mostly useful for assertions and logging.
    pub fn env_map(&self) -> BTreeMap<&str, &str> {
        self.env
            .iter()
            .map(|var| (var.key.as_str(), var.value.as_str()))
            .collect()
    }
}

/// Generic GraphQL request body
#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest<V> {
    pub query: &'static str,
    pub variables: V,
}

/// Generic GraphQL response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

/// Error entry of a GraphQL response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}
