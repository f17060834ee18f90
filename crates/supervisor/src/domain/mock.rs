//! Test adapters implementing the capability traits
//!
//! This module provides in-memory implementations of the traits in
//! [`super::traits`] for unit and integration tests. They record every call
//! so tests can assert on side effects.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use api_types::CreatePodInput;
use api_types::GpuType;
use error_stack::Report;

use super::session::Endpoint;
use super::session::Session;
use super::session::SSH_PORT;
use super::traits::Clock;
use super::traits::CommandOutput;
use super::traits::FileSync;
use super::traits::HttpProbe;
use super::traits::PodProvider;
use super::traits::RemoteExecutor;
use super::traits::StatusSource;
use super::traits::SyncDirection;
use super::traits::SyncOutcome;
use super::traits::SyncRule;
use crate::error::ProviderError;
use crate::error::RemoteExecError;
use crate::error::StatusError;
use crate::error::SyncError;

fn ssh_endpoint() -> Endpoint {
    Endpoint {
        protocol: "tcp".to_string(),
        private_port: SSH_PORT,
        public_port: 40022,
        host: "203.0.113.7".to_string(),
    }
}

/// A running session exposing ssh
pub fn test_session() -> Session {
    Session {
        id: "pod-under-test".to_string(),
        name: "trainer".to_string(),
        desired_status: Some("RUNNING".to_string()),
        image_name: None,
        endpoints: vec![ssh_endpoint()],
    }
}

/// Status source replaying a scripted sequence of poll results
pub struct MockStatusSource {
    script: Mutex<VecDeque<Result<bool, StatusError>>>,
    calls: Mutex<u32>,
}

impl MockStatusSource {
    pub fn new(script: impl IntoIterator<Item = Result<bool, StatusError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn transport_error() -> Result<bool, StatusError> {
        Err(StatusError::Transport {
            message: "connection refused".to_string(),
        })
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().expect("poisoned")
    }
}

impl StatusSource for MockStatusSource {
    fn is_training(&self) -> Result<bool, Report<StatusError>> {
        *self.calls.lock().expect("poisoned") += 1;
        self.script
            .lock()
            .expect("poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(StatusError::Transport {
                    message: "script exhausted".to_string(),
                })
            })
            .map_err(Report::new)
    }
}

fn canned(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(exit_code),
    }
}

/// Remote executor answering by last argument suffix, then by program name.
/// Unknown commands succeed silently.
#[derive(Default)]
pub struct MockRemoteExecutor {
    responses: Mutex<HashMap<String, CommandOutput>>,
    url_responses: Mutex<Vec<(String, CommandOutput)>>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl MockRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_to(&self, program: &str, exit_code: i32, stdout: &str) {
        self.responses
            .lock()
            .expect("poisoned")
            .insert(program.to_string(), canned(exit_code, stdout));
    }

    /// Answers commands whose last argument ends with `suffix`, such as a
    /// `curl` target URL. Takes precedence over [`Self::respond_to`].
    pub fn respond_to_url(&self, suffix: &str, exit_code: i32, stdout: &str) {
        self.url_responses
            .lock()
            .expect("poisoned")
            .push((suffix.to_string(), canned(exit_code, stdout)));
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().expect("poisoned").clone()
    }

    /// Paths passed to `/validate`, in submission order
    pub fn validated_paths(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter(|argv| argv.last().is_some_and(|url| url.ends_with("/validate")))
            .filter_map(|argv| {
                argv.iter()
                    .find_map(|arg| arg.strip_prefix('@').map(str::to_string))
            })
            .collect()
    }
}

impl RemoteExecutor for MockRemoteExecutor {
    fn execute(
        &self,
        _session: &Session,
        argv: &[String],
    ) -> Result<CommandOutput, Report<RemoteExecError>> {
        self.commands.lock().expect("poisoned").push(argv.to_vec());
        let last = argv.last().map(String::as_str).unwrap_or_default();
        let by_url = self
            .url_responses
            .lock()
            .expect("poisoned")
            .iter()
            .find(|(suffix, _)| last.ends_with(suffix.as_str()))
            .map(|(_, output)| output.clone());
        if let Some(output) = by_url {
            return Ok(output);
        }
        let program = argv.first().map(String::as_str).unwrap_or_default();
        Ok(self
            .responses
            .lock()
            .expect("poisoned")
            .get(program)
            .cloned()
            .unwrap_or(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCall {
    pub direction: SyncDirection,
    pub local_path: PathBuf,
    pub rules: Vec<SyncRule>,
}

/// File sync recording every transfer
#[derive(Default)]
pub struct MockFileSync {
    calls: Mutex<Vec<SyncCall>>,
    fail: Mutex<bool>,
}

impl MockFileSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().expect("poisoned") = failing;
    }

    pub fn calls(&self) -> Vec<SyncCall> {
        self.calls.lock().expect("poisoned").clone()
    }
}

impl FileSync for MockFileSync {
    fn sync_tree(
        &self,
        _session: &Session,
        direction: SyncDirection,
        local_path: &Path,
        rules: &[SyncRule],
    ) -> Result<SyncOutcome, Report<SyncError>> {
        self.calls.lock().expect("poisoned").push(SyncCall {
            direction,
            local_path: local_path.to_path_buf(),
            rules: rules.to_vec(),
        });
        if *self.fail.lock().expect("poisoned") {
            return Err(Report::new(SyncError::Failed {
                exit_code: Some(23),
            }));
        }
        Ok(SyncOutcome::Synced)
    }
}

/// Mutating provider calls, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create(String),
    Terminate(String),
    Stop(String),
    Resume(String),
}

/// In-memory control plane
#[derive(Default)]
pub struct MockPodProvider {
    pods: Mutex<Vec<Session>>,
    calls: Mutex<Vec<ProviderCall>>,
    created: Mutex<Vec<CreatePodInput>>,
    create_failure: Mutex<Option<String>>,
    gpu_types: Mutex<Vec<GpuType>>,
    /// pod id -> number of `get_pod` calls before ssh shows up
    ssh_after: Mutex<HashMap<String, u32>>,
    get_calls: Mutex<HashMap<String, u32>>,
    get_failures: Mutex<u32>,
}

impl MockPodProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a running pod without exposed ports.
    pub fn add_pod(&self, id: &str, name: &str) -> Session {
        let pod = Session {
            id: id.to_string(),
            name: name.to_string(),
            desired_status: Some("RUNNING".to_string()),
            image_name: None,
            endpoints: Vec::new(),
        };
        self.pods.lock().expect("poisoned").push(pod.clone());
        pod
    }

    /// `get_pod` reports an ssh endpoint once it has been called `calls` times.
    pub fn expose_ssh_after(&self, id: &str, calls: u32) {
        self.ssh_after
            .lock()
            .expect("poisoned")
            .insert(id.to_string(), calls);
    }

    /// The next `times` calls to `get_pod` fail with a request error.
    pub fn fail_get_pod_times(&self, times: u32) {
        *self.get_failures.lock().expect("poisoned") = times;
    }

    pub fn fail_create(&self, message: &str) {
        *self.create_failure.lock().expect("poisoned") = Some(message.to_string());
    }

    pub fn set_gpu_types(&self, ids: &[&str]) {
        *self.gpu_types.lock().expect("poisoned") = ids
            .iter()
            .map(|id| GpuType {
                id: id.to_string(),
                display_name: id.to_string(),
                memory_in_gb: None,
            })
            .collect();
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().expect("poisoned").clone()
    }

    pub fn created_inputs(&self) -> Vec<CreatePodInput> {
        self.created.lock().expect("poisoned").clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().expect("poisoned").push(call);
    }
}

impl PodProvider for MockPodProvider {
    fn list_pods(&self) -> Result<Vec<Session>, Report<ProviderError>> {
        Ok(self.pods.lock().expect("poisoned").clone())
    }

    fn get_pod(&self, pod_id: &str) -> Result<Session, Report<ProviderError>> {
        {
            let mut failures = self.get_failures.lock().expect("poisoned");
            if *failures > 0 {
                *failures -= 1;
                return Err(Report::new(ProviderError::Request {
                    message: "connection reset".to_string(),
                }));
            }
        }
        let calls = {
            let mut get_calls = self.get_calls.lock().expect("poisoned");
            let count = get_calls.entry(pod_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let mut pod = self
            .pods
            .lock()
            .expect("poisoned")
            .iter()
            .find(|pod| pod.id == pod_id)
            .cloned()
            .ok_or_else(|| {
                Report::new(ProviderError::Api {
                    message: format!("pod {pod_id} not found"),
                })
            })?;

        let exposed = self
            .ssh_after
            .lock()
            .expect("poisoned")
            .get(pod_id)
            .is_some_and(|after| calls > *after);
        if exposed && pod.ssh_endpoint().is_none() {
            pod.endpoints.push(ssh_endpoint());
        }
        Ok(pod)
    }

    fn create_pod(&self, input: &CreatePodInput) -> Result<Session, Report<ProviderError>> {
        if let Some(message) = self.create_failure.lock().expect("poisoned").clone() {
            return Err(Report::new(ProviderError::Api { message }));
        }
        self.created.lock().expect("poisoned").push(input.clone());
        let id = format!("created-{}", self.created_inputs().len());
        self.record(ProviderCall::Create(id.clone()));
        Ok(self.add_pod(&id, &input.name))
    }

    fn terminate_pod(&self, pod_id: &str) -> Result<(), Report<ProviderError>> {
        self.record(ProviderCall::Terminate(pod_id.to_string()));
        self.pods
            .lock()
            .expect("poisoned")
            .retain(|pod| pod.id != pod_id);
        Ok(())
    }

    fn stop_pod(&self, pod_id: &str) -> Result<(), Report<ProviderError>> {
        self.record(ProviderCall::Stop(pod_id.to_string()));
        Ok(())
    }

    fn resume_pod(&self, pod_id: &str, _gpu_count: u32) -> Result<(), Report<ProviderError>> {
        self.record(ProviderCall::Resume(pod_id.to_string()));
        Ok(())
    }

    fn list_gpu_types(&self) -> Result<Vec<GpuType>, Report<ProviderError>> {
        Ok(self.gpu_types.lock().expect("poisoned").clone())
    }
}

/// Probe that starts answering after a number of failed attempts
pub struct MockHttpProbe {
    unreachable_for: Option<u32>,
    urls: Mutex<Vec<String>>,
}

impl MockHttpProbe {
    pub fn reachable_after(attempts: u32) -> Self {
        Self {
            unreachable_for: Some(attempts),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable_for: None,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("poisoned").clone()
    }
}

impl HttpProbe for MockHttpProbe {
    fn is_reachable(&self, url: &str) -> bool {
        let mut urls = self.urls.lock().expect("poisoned");
        urls.push(url.to_string());
        let attempt = urls.len() as u32;
        self.unreachable_for
            .is_some_and(|unreachable_for| attempt > unreachable_for)
    }
}

/// Virtual clock: sleeping advances time instantly
pub struct MockClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("poisoned").clone()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().expect("poisoned")
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().expect("poisoned") += duration;
        self.sleeps.lock().expect("poisoned").push(duration);
    }
}
