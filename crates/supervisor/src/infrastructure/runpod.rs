//! RunPod GraphQL control-plane client.

use std::time::Duration;

use api_types::CreatePodInput;
use api_types::GpuType;
use api_types::GraphQlRequest;
use api_types::GraphQlResponse;
use api_types::Pod;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::blocking::Client as BlockingClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::domain::session::Session;
use crate::domain::traits::PodProvider;
use crate::error::ProviderError;

pub const DEFAULT_API_URL: &str = "https://api.runpod.io/graphql";

macro_rules! pod_fields {
    () => {
        "id name desiredStatus imageName runtime { uptimeInSeconds ports { ip isIpPublic privatePort publicPort type } }"
    };
}

const LIST_PODS: &str = concat!("query Pods { myself { pods { ", pod_fields!(), " } } }");
const GET_POD: &str = concat!(
    "query Pod($input: PodFilter!) { pod(input: $input) { ",
    pod_fields!(),
    " } }"
);
const CREATE_POD: &str = concat!(
    "mutation CreatePod($input: PodFindAndDeployOnDemandInput!) { podFindAndDeployOnDemand(input: $input) { ",
    pod_fields!(),
    " } }"
);
const TERMINATE_POD: &str =
    "mutation TerminatePod($input: PodTerminateInput!) { podTerminate(input: $input) }";
const STOP_POD: &str =
    "mutation StopPod($input: PodStopInput!) { podStop(input: $input) { id desiredStatus } }";
const RESUME_POD: &str =
    "mutation ResumePod($input: PodResumeInput!) { podResume(input: $input) { id desiredStatus } }";
const GPU_TYPES: &str = "query GpuTypes { gpuTypes { id displayName memoryInGb } }";

#[derive(Debug, Deserialize)]
struct MyselfData {
    myself: Myself,
}

#[derive(Debug, Deserialize)]
struct Myself {
    #[serde(default)]
    pods: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct PodData {
    pod: Option<Pod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePodData {
    pod_find_and_deploy_on_demand: Option<Pod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GpuTypesData {
    gpu_types: Vec<GpuType>,
}

#[derive(Debug, Serialize)]
struct Input<T> {
    input: T,
}

pub struct RunpodClient {
    http: BlockingClient,
    endpoint: Url,
}

impl RunpodClient {
    pub fn new(
        api_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, Report<ProviderError>> {
        let mut endpoint = Url::parse(api_url)
            .change_context(ProviderError::Request {
                message: "Invalid API URL".to_string(),
            })
            .attach_printable_lazy(|| format!("url: {api_url}"))?;
        endpoint.query_pairs_mut().append_pair("api_key", api_key);

        let http = BlockingClient::builder()
            .timeout(timeout)
            .build()
            .change_context(ProviderError::Request {
                message: "Failed to create HTTP client".to_string(),
            })?;

        Ok(Self { http, endpoint })
    }

    fn execute<V, T>(&self, query: &'static str, variables: V) -> Result<T, Report<ProviderError>>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let operation = query.split(['(', ' ', '{']).nth(1).unwrap_or_default();
        debug!(operation, "Sending GraphQL request");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&GraphQlRequest { query, variables })
            .send()
            .map_err(|e| {
                Report::new(ProviderError::Request {
                    message: e.without_url().to_string(),
                })
            })
            .attach_printable_lazy(|| format!("operation: {operation}"))?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            Report::new(ProviderError::Request {
                message: e.without_url().to_string(),
            })
        })?;

        let envelope: GraphQlResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(Report::new(ProviderError::Decode {
                    message: e.to_string(),
                })
                .attach_printable(format!("operation: {operation}")));
            }
            Err(_) => {
                return Err(Report::new(ProviderError::Request {
                    message: format!("HTTP {status}"),
                })
                .attach_printable(format!("operation: {operation}"))
                .attach_printable(format!("body: {body}")));
            }
        };

        if !envelope.errors.is_empty() {
            let message = envelope
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Report::new(ProviderError::Api { message })
                .attach_printable(format!("operation: {operation}")));
        }

        envelope.data.ok_or_else(|| {
            Report::new(ProviderError::Decode {
                message: format!("{operation} returned no data"),
            })
        })
    }
}

impl PodProvider for RunpodClient {
    fn list_pods(&self) -> Result<Vec<Session>, Report<ProviderError>> {
        let data: MyselfData = self.execute(LIST_PODS, json!({}))?;
        Ok(data.myself.pods.into_iter().map(Session::from).collect())
    }

    fn get_pod(&self, pod_id: &str) -> Result<Session, Report<ProviderError>> {
        let data: PodData = self.execute(
            GET_POD,
            Input {
                input: json!({ "podId": pod_id }),
            },
        )?;
        data.pod.map(Session::from).ok_or_else(|| {
            Report::new(ProviderError::Api {
                message: format!("pod {pod_id} not found"),
            })
        })
    }

    fn create_pod(&self, input: &CreatePodInput) -> Result<Session, Report<ProviderError>> {
        let data: CreatePodData = self.execute(CREATE_POD, Input { input })?;
        data.pod_find_and_deploy_on_demand
            .map(Session::from)
            .ok_or_else(|| {
                Report::new(ProviderError::Api {
                    message: "no pod was deployed".to_string(),
                })
            })
    }

    fn terminate_pod(&self, pod_id: &str) -> Result<(), Report<ProviderError>> {
        let _: serde_json::Value = self.execute(
            TERMINATE_POD,
            Input {
                input: json!({ "podId": pod_id }),
            },
        )?;
        Ok(())
    }

    fn stop_pod(&self, pod_id: &str) -> Result<(), Report<ProviderError>> {
        let _: serde_json::Value = self.execute(
            STOP_POD,
            Input {
                input: json!({ "podId": pod_id }),
            },
        )?;
        Ok(())
    }

    fn resume_pod(&self, pod_id: &str, gpu_count: u32) -> Result<(), Report<ProviderError>> {
        let _: serde_json::Value = self.execute(
            RESUME_POD,
            Input {
                input: json!({ "podId": pod_id, "gpuCount": gpu_count }),
            },
        )?;
        Ok(())
    }

    fn list_gpu_types(&self) -> Result<Vec<GpuType>, Report<ProviderError>> {
        let data: GpuTypesData = self.execute(GPU_TYPES, json!({}))?;
        Ok(data.gpu_types)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::matchers::query_param;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    async fn respond(body: serde_json::Value) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(query_param("api_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    async fn with_client<F, T>(mock_server: &MockServer, f: F) -> T
    where
        F: FnOnce(RunpodClient) -> T + Send + 'static,
        T: Send + 'static,
    {
        let url = format!("{}/graphql", mock_server.uri());
        tokio::task::spawn_blocking(move || {
            let client = RunpodClient::new(&url, "test-key", Duration::from_secs(5))
                .expect("should build client");
            f(client)
        })
        .await
        .expect("blocking task panicked")
    }

    #[tokio::test]
    async fn lists_pods_with_endpoints() {
        let mock_server = respond(json!({
            "data": {
                "myself": {
                    "pods": [
                        {
                            "id": "abc",
                            "name": "trainer",
                            "desiredStatus": "RUNNING",
                            "imageName": "image:1",
                            "runtime": {
                                "uptimeInSeconds": 12,
                                "ports": [
                                    {"ip": "100.65.0.1", "isIpPublic": false, "privatePort": 6901, "publicPort": 60001, "type": "http"},
                                    {"ip": "203.0.113.7", "isIpPublic": true, "privatePort": 22, "publicPort": 40022, "type": "tcp"}
                                ]
                            }
                        },
                        {"id": "def", "name": "starting", "desiredStatus": "RUNNING", "runtime": null}
                    ]
                }
            }
        }))
        .await;

        let pods = with_client(&mock_server, |client| client.list_pods())
            .await
            .expect("should list pods");

        assert_eq!(pods.len(), 2);
        let ssh = pods[0].ssh_endpoint().expect("ssh should be exposed");
        assert_eq!(ssh.host, "203.0.113.7");
        assert_eq!(ssh.public_port, 40022);
        assert!(pods[1].endpoints.is_empty());
    }

    #[tokio::test]
    async fn graphql_errors_become_api_errors() {
        let mock_server = respond(json!({
            "data": null,
            "errors": [{"message": "There are no longer any instances available"}]
        }))
        .await;

        let err = with_client(&mock_server, |client| client.terminate_pod("abc"))
            .await
            .expect_err("should fail");

        assert_eq!(
            err.current_context(),
            &ProviderError::Api {
                message: "There are no longer any instances available".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_pod_is_an_error() {
        let mock_server = respond(json!({"data": {"pod": null}})).await;

        let err = with_client(&mock_server, |client| client.get_pod("ghost"))
            .await
            .expect_err("should fail");

        assert!(matches!(err.current_context(), ProviderError::Api { .. }));
    }

    #[tokio::test]
    async fn create_sends_pod_input() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({
                "variables": {"input": {"name": "trainer", "gpuTypeId": "NVIDIA A40", "ports": "22/tcp"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"podFindAndDeployOnDemand": {"id": "new", "name": "trainer", "runtime": null}}
            })))
            .mount(&mock_server)
            .await;

        let input = CreatePodInput {
            name: "trainer".to_string(),
            image_name: "image:1".to_string(),
            gpu_type_id: "NVIDIA A40".to_string(),
            cloud_type: "ALL".to_string(),
            gpu_count: 1,
            volume_in_gb: 0,
            container_disk_in_gb: 60,
            support_public_ip: true,
            ports: "22/tcp".to_string(),
            env: Vec::new(),
        };
        let pod = with_client(&mock_server, move |client| client.create_pod(&input))
            .await
            .expect("should create");

        assert_eq!(pod.id, "new");
    }

    #[tokio::test]
    async fn lists_gpu_types() {
        let mock_server = respond(json!({
            "data": {"gpuTypes": [
                {"id": "NVIDIA A40", "displayName": "A40", "memoryInGb": 48},
                {"id": "NVIDIA RTX 6000 Ada Generation", "displayName": "RTX 6000 Ada", "memoryInGb": 48}
            ]}
        }))
        .await;

        let gpu_types = with_client(&mock_server, |client| client.list_gpu_types())
            .await
            .expect("should list");

        assert_eq!(gpu_types.len(), 2);
        assert_eq!(gpu_types[0].display_name, "A40");
    }

    #[tokio::test]
    async fn http_failure_without_envelope_is_request_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&mock_server)
            .await;

        let err = with_client(&mock_server, |client| client.list_pods())
            .await
            .expect_err("should fail");

        assert!(matches!(
            err.current_context(),
            ProviderError::Request { .. }
        ));
    }
}
