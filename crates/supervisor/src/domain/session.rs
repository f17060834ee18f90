//! The supervised pod as seen by every component.

use std::fmt;

use api_types::Pod;

/// Private port of the ssh daemon inside the pod
pub const SSH_PORT: u16 = 22;
/// Private port of the remote desktop, used as the management endpoint
pub const DESKTOP_PORT: u16 = 6901;
/// Private port of the training control surface
pub const TRAINING_API_PORT: u16 = 8000;

const PROXY_DOMAIN: &str = "proxy.runpod.net";

/// One exposed network endpoint of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: String,
    pub private_port: u16,
    pub public_port: u16,
    pub host: String,
}

/// A provisioned pod. Never mutated; refreshed by re-fetching from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub desired_status: Option<String>,
    pub image_name: Option<String>,
    pub endpoints: Vec<Endpoint>,
}

impl Session {
    pub fn endpoint(&self, private_port: u16) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.private_port == private_port)
    }

    /// Endpoint usable for ssh/rsync, if the pod already exposes one.
    pub fn ssh_endpoint(&self) -> Option<&Endpoint> {
        self.endpoint(SSH_PORT)
            .filter(|endpoint| !endpoint.host.is_empty() && endpoint.public_port != 0)
    }

    /// HTTPS proxy URL of an http port, e.g. `https://abc-8000.proxy.runpod.net`
    pub fn proxy_url(&self, private_port: u16) -> String {
        format!("https://{}-{}.{}", self.id, private_port, PROXY_DOMAIN)
    }
}

/// `name (id)`, followed by the desired status and image when known
impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)?;
        if let Some(status) = &self.desired_status {
            write!(f, ", {status}")?;
        }
        if let Some(image) = &self.image_name {
            write!(f, ", image {image}")?;
        }
        Ok(())
    }
}

impl From<Pod> for Session {
    fn from(pod: Pod) -> Self {
        let endpoints = pod
            .runtime
            .and_then(|runtime| runtime.ports)
            .unwrap_or_default()
            .into_iter()
            .map(|port| Endpoint {
                protocol: port.protocol,
                private_port: port.private_port,
                public_port: port.public_port,
                host: port.ip,
            })
            .collect();

        Self {
            id: pod.id,
            name: pod.name,
            desired_status: pod.desired_status,
            image_name: pod.image_name,
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use api_types::PodRuntime;
    use api_types::PortMapping;
    use similar_asserts::assert_eq;

    use super::*;

    fn pod_with_ports(ports: Option<Vec<PortMapping>>) -> Pod {
        Pod {
            id: "pod1".to_string(),
            name: "trainer".to_string(),
            desired_status: Some("RUNNING".to_string()),
            image_name: None,
            runtime: Some(PodRuntime {
                uptime_in_seconds: Some(12),
                ports,
            }),
        }
    }

    #[test]
    fn converts_ports_into_endpoints() {
        let session = Session::from(pod_with_ports(Some(vec![PortMapping {
            ip: "1.2.3.4".to_string(),
            is_ip_public: true,
            private_port: 22,
            public_port: 40100,
            protocol: "tcp".to_string(),
        }])));

        let ssh = session.ssh_endpoint().expect("should expose ssh");
        assert_eq!(ssh.host, "1.2.3.4");
        assert_eq!(ssh.public_port, 40100);
        assert!(session.endpoint(DESKTOP_PORT).is_none());
    }

    #[test]
    fn session_without_runtime_has_no_endpoints() {
        let mut pod = pod_with_ports(None);
        pod.runtime = None;
        let session = Session::from(pod);
        assert!(session.endpoints.is_empty());
        assert!(session.ssh_endpoint().is_none());
    }

    #[test]
    fn proxy_url_uses_pod_id_and_port() {
        let session = Session::from(pod_with_ports(None));
        assert_eq!(
            session.proxy_url(TRAINING_API_PORT),
            "https://pod1-8000.proxy.runpod.net"
        );
    }

    #[test]
    fn display_includes_status_and_image() {
        let mut session = Session::from(pod_with_ports(None));
        assert_eq!(session.to_string(), "trainer (pod1), RUNNING");

        session.image_name = Some("ht/trainer:0.3".to_string());
        assert_eq!(session.to_string(), "trainer (pod1), RUNNING, image ht/trainer:0.3");

        session.desired_status = None;
        session.image_name = None;
        assert_eq!(session.to_string(), "trainer (pod1)");
    }
}
