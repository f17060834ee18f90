//! Immutable run configuration built once from CLI input.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;

use super::cli::MonitorArgs;
use super::cli::ProvisionArgs;
use super::cli::SessionArgs;
use super::cli::SyncArgs;
use crate::domain::jobs::JobOrder;
use crate::domain::lifecycle::ExistingPodPolicy;
use crate::domain::lifecycle::PodSpec;
use crate::domain::lifecycle::StartupPayload;
use crate::domain::lifecycle::TeardownPolicy;
use crate::error::ConfigError;

/// Monitor loop timing and policy flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Extra wait after a confirmed stop before running post-training commands
    pub grace_period: Duration,
    /// Abort once more than this many polls in a row failed
    pub max_consecutive_errors: u32,
    pub immediate: bool,
    pub wait_for_training_start: bool,
    pub terminate_on_error: bool,
    pub teardown: TeardownPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            grace_period: Duration::ZERO,
            max_consecutive_errors: 10,
            immediate: false,
            wait_for_training_start: false,
            terminate_on_error: false,
            teardown: TeardownPolicy::Keep,
        }
    }
}

/// Sequential submission of training files found on the pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub directory: String,
    pub order: JobOrder,
    pub train_mode: String,
    pub sdxl: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub ssh_key: Option<PathBuf>,
    pub ssh_user: String,
    pub remote_dir: String,
    pub push_from: Option<PathBuf>,
    pub pull_to: Option<PathBuf>,
    pub continuous: bool,
    pub use_wsl: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ssh_key: None,
            ssh_user: "kasm-user".to_string(),
            remote_dir: "/home/ht/training/".to_string(),
            push_from: None,
            pull_to: None,
            continuous: false,
            use_wsl: false,
        }
    }
}

/// Everything needed to supervise one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub pod_name: String,
    pub password: String,
    pub monitor: MonitorConfig,
    /// `Some` when training files are submitted by the supervisor
    pub jobs: Option<JobConfig>,
    pub sync: SyncConfig,
}

impl RunConfig {
    /// Builds the configuration and rejects conflicting options.
    pub fn new(
        session: &SessionArgs,
        monitor: &MonitorArgs,
        sync: &SyncArgs,
    ) -> Result<Self, Report<ConfigError>> {
        if monitor.submit_training_files && monitor.wait_for_training_start {
            return Err(Report::new(ConfigError::ConflictingPolicy {
                message: "--submit-training-files cannot be combined with --wait-for-training-start"
                    .to_string(),
            }));
        }

        if sync.continuous_rsync && sync.rsync_to.is_none() {
            return Err(Report::new(ConfigError::ConflictingPolicy {
                message: "--continuous-rsync requires --rsync-to".to_string(),
            }));
        }

        let ssh_key = Some(sync.ssh_key.as_path())
            .filter(|key| !key.as_os_str().is_empty())
            .map(expand_home);

        if monitor.submit_training_files && ssh_key.is_none() {
            return Err(Report::new(ConfigError::MissingCredential {
                message: "--submit-training-files requires --ssh-key".to_string(),
            }));
        }

        let teardown = if monitor.terminate {
            TeardownPolicy::Terminate
        } else if monitor.restart {
            TeardownPolicy::Restart
        } else {
            TeardownPolicy::Keep
        };

        let jobs = monitor.submit_training_files.then(|| JobConfig {
            directory: monitor.training_files_dir.clone(),
            order: monitor.job_order,
            train_mode: monitor.train_mode.clone(),
            sdxl: monitor.sdxl,
        });

        Ok(Self {
            pod_name: session.pod_name.clone(),
            password: session.vnc_password.clone(),
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(monitor.iter_sec),
                grace_period: Duration::from_secs(monitor.wait_for_sec),
                max_consecutive_errors: monitor.max_errors,
                immediate: monitor.immediate,
                wait_for_training_start: monitor.wait_for_training_start,
                terminate_on_error: monitor.terminate_on_error,
                teardown,
            },
            jobs,
            sync: SyncConfig {
                ssh_key,
                ssh_user: sync.ssh_user.clone(),
                remote_dir: sync.remote_dir.clone(),
                push_from: sync.rsync_from.as_deref().map(expand_home),
                pull_to: sync.rsync_to.as_deref().map(expand_home),
                continuous: sync.continuous_rsync,
                use_wsl: sync.use_wsl,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(900),
        }
    }
}

/// Pod creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub spec: PodSpec,
    pub existing: Option<ExistingPodPolicy>,
    pub readiness: ReadinessConfig,
}

impl ProvisionConfig {
    pub fn new(session: &SessionArgs, provision: &ProvisionArgs) -> Self {
        Self {
            spec: PodSpec {
                name: session.pod_name.clone(),
                image_name: provision.image_name.clone(),
                gpu_type_id: provision.gpu_type.clone(),
                volume_in_gb: provision.volume_gb,
                container_disk_in_gb: provision.container_disk_gb,
                password: session.vnc_password.clone(),
                startup: StartupPayload {
                    receive_code: provision.receive_code.clone(),
                    unzip: provision.unzip,
                    checkpoint_url: provision.checkpoint_url.clone(),
                },
            },
            existing: provision.existing,
            readiness: ReadinessConfig {
                poll_interval: Duration::from_secs(provision.ready_poll_sec.max(1)),
                timeout: Duration::from_secs(provision.ready_timeout_sec),
            },
        }
    }
}

/// Expands a leading `~` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
