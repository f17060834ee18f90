//! Capabilities the domain needs from the outside world

use std::path::Path;
use std::time::Duration;
use std::time::Instant;

use api_types::CreatePodInput;
use api_types::GpuType;
use error_stack::Report;

use super::session::Session;
use crate::error::ProviderError;
use crate::error::RemoteExecError;
use crate::error::StatusError;
use crate::error::SyncError;

/// Source of the remote "is training active" signal
pub trait StatusSource: Send + Sync {
    fn is_training(&self) -> Result<bool, Report<StatusError>>;
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs commands on the pod.
///
/// Only failures to run the command at all are errors; a non-zero exit is
/// reported through [`CommandOutput::exit_code`].
pub trait RemoteExecutor: Send + Sync {
    fn execute(
        &self,
        session: &Session,
        argv: &[String],
    ) -> Result<CommandOutput, Report<RemoteExecError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SyncDirection {
    /// local -> pod
    #[display("push")]
    Push,
    /// pod -> local
    #[display("pull")]
    Pull,
}

/// Include/exclude filters applied to a tree transfer, in evaluation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRule {
    Include(String),
    Exclude(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Skipped { reason: String },
}

/// Bulk copy of a directory tree between the local machine and the pod
pub trait FileSync: Send + Sync {
    fn sync_tree(
        &self,
        session: &Session,
        direction: SyncDirection,
        local_path: &Path,
        rules: &[SyncRule],
    ) -> Result<SyncOutcome, Report<SyncError>>;
}

/// Compute-provider control plane
pub trait PodProvider: Send + Sync {
    fn list_pods(&self) -> Result<Vec<Session>, Report<ProviderError>>;

    fn get_pod(&self, pod_id: &str) -> Result<Session, Report<ProviderError>>;

    fn create_pod(&self, input: &CreatePodInput) -> Result<Session, Report<ProviderError>>;

    fn terminate_pod(&self, pod_id: &str) -> Result<(), Report<ProviderError>>;

    fn stop_pod(&self, pod_id: &str) -> Result<(), Report<ProviderError>>;

    fn resume_pod(&self, pod_id: &str, gpu_count: u32) -> Result<(), Report<ProviderError>>;

    fn list_gpu_types(&self) -> Result<Vec<GpuType>, Report<ProviderError>>;
}

/// Checks whether an HTTP endpoint answers with a success status
pub trait HttpProbe: Send + Sync {
    fn is_reachable(&self, url: &str) -> bool;
}

/// Time source and blocking sleep
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
