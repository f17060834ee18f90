//! Pod get-or-create and teardown against the provider control plane

use api_types::CreatePodInput;
use api_types::EnvVar;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::session::Session;
use super::traits::PodProvider;
use crate::error::ProviderError;

/// Ports exposed on every pod: desktop, training API, ssh
pub const POD_PORTS: &str = "6901/http,8000/http,22/tcp";
const GPU_COUNT: u32 = 1;

/// What to do with pods that already carry the requested name
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExistingPodPolicy {
    /// Terminate them and create a fresh pod
    Terminate,
    /// Restart them and reuse the first one
    Restart,
    /// Reuse the first one as is
    Keep,
}

/// What to do with the pod once supervision ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TeardownPolicy {
    #[display("terminate")]
    Terminate,
    #[display("restart")]
    Restart,
    #[display("keep")]
    Keep,
}

/// Parameters read by the container on startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupPayload {
    pub receive_code: Option<String>,
    pub unzip: bool,
    pub checkpoint_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    pub name: String,
    pub image_name: String,
    pub gpu_type_id: String,
    pub volume_in_gb: u32,
    pub container_disk_in_gb: u32,
    /// Desktop and training API password, passed as `VNC_PW`
    pub password: String,
    pub startup: StartupPayload,
}

impl PodSpec {
    pub fn to_create_input(&self) -> CreatePodInput {
        let mut env = vec![EnvVar {
            key: "VNC_PW".to_string(),
            value: self.password.clone(),
        }];
        if let Some(code) = &self.startup.receive_code {
            env.push(EnvVar {
                key: "RECEIVE_CODE".to_string(),
                value: code.clone(),
            });
        }
        env.push(EnvVar {
            key: "UNZIP".to_string(),
            value: if self.startup.unzip { "1" } else { "0" }.to_string(),
        });
        if let Some(url) = &self.startup.checkpoint_url {
            env.push(EnvVar {
                key: "CHECKPOINT_URL".to_string(),
                value: url.clone(),
            });
        }

        CreatePodInput {
            name: self.name.clone(),
            image_name: self.image_name.clone(),
            gpu_type_id: self.gpu_type_id.clone(),
            cloud_type: "ALL".to_string(),
            gpu_count: GPU_COUNT,
            volume_in_gb: self.volume_in_gb,
            container_disk_in_gb: self.container_disk_in_gb,
            support_public_ip: true,
            ports: POD_PORTS.to_string(),
            env,
        }
    }
}

pub struct PodLifecycleManager<'a> {
    provider: &'a dyn PodProvider,
}

impl<'a> PodLifecycleManager<'a> {
    pub fn new(provider: &'a dyn PodProvider) -> Self {
        Self { provider }
    }

    pub fn find_by_name(&self, name: &str) -> Result<Vec<Session>, Report<ProviderError>> {
        Ok(self
            .provider
            .list_pods()?
            .into_iter()
            .filter(|pod| pod.name == name)
            .collect())
    }

    /// First pod with the given name, or `PodNotFound`.
    pub fn find_one(&self, name: &str) -> Result<Session, Report<ProviderError>> {
        self.find_by_name(name)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Report::new(ProviderError::PodNotFound {
                    name: name.to_string(),
                })
            })
    }

    pub fn get_or_create(
        &self,
        spec: &PodSpec,
        existing: Option<ExistingPodPolicy>,
    ) -> Result<Session, Report<ProviderError>> {
        let matches = self.find_by_name(&spec.name)?;

        let remaining = match existing {
            Some(ExistingPodPolicy::Terminate) => {
                for pod in &matches {
                    self.terminate(pod)?;
                }
                Vec::new()
            }
            Some(ExistingPodPolicy::Restart) => matches
                .iter()
                .map(|pod| self.restart(pod))
                .collect::<Result<Vec<_>, _>>()?,
            Some(ExistingPodPolicy::Keep) => matches,
            None => {
                if !matches.is_empty() {
                    warn!(
                        "{} pod(s) named {} already exist, creating another one",
                        matches.len(),
                        spec.name
                    );
                }
                Vec::new()
            }
        };

        if let Some(pod) = remaining.into_iter().next() {
            info!("Reusing pod {pod}");
            return Ok(pod);
        }

        self.create(spec)
    }

    fn create(&self, spec: &PodSpec) -> Result<Session, Report<ProviderError>> {
        let input = spec.to_create_input();
        info!(
            image = %input.image_name,
            gpu_type = %input.gpu_type_id,
            "Creating pod {}",
            input.name
        );

        match self.provider.create_pod(&input) {
            Ok(pod) => {
                info!("Started pod {} ({})", pod.name, pod.id);
                Ok(pod)
            }
            Err(report) => Err(self.diagnose_create_failure(&input.gpu_type_id, report)),
        }
    }

    /// Lists valid GPU types when the requested one does not exist.
    fn diagnose_create_failure(
        &self,
        gpu_type_id: &str,
        report: Report<ProviderError>,
    ) -> Report<ProviderError> {
        match self.provider.list_gpu_types() {
            Ok(gpu_types) if !gpu_types.iter().any(|gpu| gpu.id == gpu_type_id) => {
                error!("GPU type {gpu_type_id} not found, available GPU types:");
                for gpu in &gpu_types {
                    error!("  {} ({})", gpu.id, gpu.display_name);
                }
                report.change_context(ProviderError::GpuTypeNotFound {
                    gpu_type: gpu_type_id.to_string(),
                })
            }
            Ok(_) => report,
            Err(list_error) => {
                warn!("Failed to list GPU types: {list_error:?}");
                report
            }
        }
    }

    pub fn terminate(&self, pod: &Session) -> Result<(), Report<ProviderError>> {
        info!("Terminating pod with id {}", pod.id);
        self.provider
            .terminate_pod(&pod.id)
            .attach_printable_lazy(|| format!("pod id: {}", pod.id))
    }

    /// Stops and resumes the pod, returning its refreshed state.
    pub fn restart(&self, pod: &Session) -> Result<Session, Report<ProviderError>> {
        info!("Restarting pod with id {}", pod.id);
        self.provider
            .stop_pod(&pod.id)
            .attach_printable_lazy(|| format!("stopping pod id: {}", pod.id))?;
        self.provider
            .resume_pod(&pod.id, GPU_COUNT)
            .attach_printable_lazy(|| format!("resuming pod id: {}", pod.id))?;
        self.provider.get_pod(&pod.id)
    }

    pub fn teardown(
        &self,
        pod: &Session,
        policy: TeardownPolicy,
    ) -> Result<(), Report<ProviderError>> {
        match policy {
            TeardownPolicy::Terminate => self.terminate(pod),
            TeardownPolicy::Restart => self.restart(pod).map(|_| ()),
            TeardownPolicy::Keep => {
                info!("Keeping pod {} ({})", pod.name, pod.id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::mock::MockPodProvider;
    use crate::domain::mock::ProviderCall;

    fn spec() -> PodSpec {
        PodSpec {
            name: "trainer".to_string(),
            image_name: "image:1".to_string(),
            gpu_type_id: "NVIDIA A40".to_string(),
            volume_in_gb: 0,
            container_disk_in_gb: 60,
            password: "secret".to_string(),
            startup: StartupPayload {
                receive_code: Some("1234-code".to_string()),
                unzip: true,
                checkpoint_url: None,
            },
        }
    }

    #[test]
    fn create_input_carries_ports_and_startup_env() {
        let input = spec().to_create_input();
        assert_eq!(input.ports, "6901/http,8000/http,22/tcp");
        assert!(input.support_public_ip);
        let env = input.env_map();
        assert_eq!(env.get("VNC_PW"), Some(&"secret"));
        assert_eq!(env.get("RECEIVE_CODE"), Some(&"1234-code"));
        assert_eq!(env.get("UNZIP"), Some(&"1"));
        assert_eq!(env.get("CHECKPOINT_URL"), None);
    }

    #[test]
    fn creates_pod_when_none_exists() {
        let provider = MockPodProvider::new();
        let manager = PodLifecycleManager::new(&provider);

        let pod = manager
            .get_or_create(&spec(), Some(ExistingPodPolicy::Keep))
            .expect("should create");

        assert_eq!(pod.name, "trainer");
        assert_eq!(provider.created_inputs().len(), 1);
    }

    #[test]
    fn keep_reuses_first_match() {
        let provider = MockPodProvider::new();
        provider.add_pod("p1", "trainer");
        provider.add_pod("p2", "trainer");
        provider.add_pod("p3", "other");
        let manager = PodLifecycleManager::new(&provider);

        let pod = manager
            .get_or_create(&spec(), Some(ExistingPodPolicy::Keep))
            .expect("should reuse");

        assert_eq!(pod.id, "p1");
        assert!(provider.created_inputs().is_empty());
    }

    #[test]
    fn terminate_removes_all_matches_then_creates() {
        let provider = MockPodProvider::new();
        provider.add_pod("p1", "trainer");
        provider.add_pod("p2", "trainer");
        let manager = PodLifecycleManager::new(&provider);

        manager
            .get_or_create(&spec(), Some(ExistingPodPolicy::Terminate))
            .expect("should create");

        assert_eq!(provider.terminated(), vec!["p1".to_string(), "p2".to_string()]);
        assert_eq!(provider.created_inputs().len(), 1);
    }

    #[test]
    fn restart_restarts_matches_and_reuses_first() {
        let provider = MockPodProvider::new();
        provider.add_pod("p1", "trainer");
        provider.add_pod("p2", "trainer");
        let manager = PodLifecycleManager::new(&provider);

        let pod = manager
            .get_or_create(&spec(), Some(ExistingPodPolicy::Restart))
            .expect("should restart");

        assert_eq!(pod.id, "p1");
        let calls = provider.calls();
        assert!(calls.contains(&ProviderCall::Stop("p1".to_string())));
        assert!(calls.contains(&ProviderCall::Resume("p1".to_string())));
        assert!(calls.contains(&ProviderCall::Stop("p2".to_string())));
        assert!(calls.contains(&ProviderCall::Resume("p2".to_string())));
        assert!(provider.created_inputs().is_empty());
    }

    #[test]
    fn no_policy_always_creates() {
        let provider = MockPodProvider::new();
        provider.add_pod("p1", "trainer");
        let manager = PodLifecycleManager::new(&provider);

        let pod = manager.get_or_create(&spec(), None).expect("should create");

        assert_ne!(pod.id, "p1");
        assert!(provider.terminated().is_empty());
    }

    #[test]
    fn unknown_gpu_type_is_reported() {
        let provider = MockPodProvider::new();
        provider.fail_create("There are no longer any instances available");
        provider.set_gpu_types(&["NVIDIA RTX A6000", "NVIDIA A100 80GB PCIe"]);
        let manager = PodLifecycleManager::new(&provider);

        let err = manager
            .get_or_create(&spec(), None)
            .expect_err("should fail");

        assert_eq!(
            err.current_context(),
            &ProviderError::GpuTypeNotFound {
                gpu_type: "NVIDIA A40".to_string()
            }
        );
    }

    #[test]
    fn known_gpu_type_keeps_provider_error() {
        let provider = MockPodProvider::new();
        provider.fail_create("out of capacity");
        provider.set_gpu_types(&["NVIDIA A40"]);
        let manager = PodLifecycleManager::new(&provider);

        let err = manager
            .get_or_create(&spec(), None)
            .expect_err("should fail");

        assert!(matches!(err.current_context(), ProviderError::Api { .. }));
    }

    #[test]
    fn teardown_applies_policy() {
        let provider = MockPodProvider::new();
        let pod = provider.add_pod("p1", "trainer");
        let manager = PodLifecycleManager::new(&provider);

        manager
            .teardown(&pod, TeardownPolicy::Keep)
            .expect("keep should succeed");
        assert!(provider.calls().is_empty());

        manager
            .teardown(&pod, TeardownPolicy::Restart)
            .expect("restart should succeed");
        assert!(provider.calls().contains(&ProviderCall::Resume("p1".to_string())));

        manager
            .teardown(&pod, TeardownPolicy::Terminate)
            .expect("terminate should succeed");
        assert_eq!(provider.terminated(), vec!["p1".to_string()]);
    }

    #[test]
    fn find_one_reports_missing_pod() {
        let provider = MockPodProvider::new();
        let manager = PodLifecycleManager::new(&provider);
        let err = manager.find_one("ghost").expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            ProviderError::PodNotFound { .. }
        ));
    }
}
