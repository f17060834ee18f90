//! Training monitor: polls the pod, debounces stop signals, advances the job
//! queue and applies the teardown policy.

pub mod state;

use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::error;
use tracing::info;
use tracing::warn;

pub use self::state::AbortReason;
pub use self::state::MonitorState;
pub use self::state::Observation;
pub use self::state::TrainingSignal;
pub use self::state::Transition;
use super::jobs::JobDescriptor;
use super::jobs::JobDiscovery;
use super::jobs::JobQueue;
use super::jobs::JobSubmitter;
use super::lifecycle::PodLifecycleManager;
use super::lifecycle::TeardownPolicy;
use super::session::Session;
use super::session::TRAINING_API_PORT;
use super::traits::Clock;
use super::traits::FileSync;
use super::traits::RemoteExecutor;
use super::traits::StatusSource;
use super::traits::SyncDirection;
use super::traits::SyncOutcome;
use super::traits::SyncRule;
use crate::config::RunConfig;
use crate::error::ConfigError;
use crate::error::MonitorError;
use crate::error::SyncError;

/// Directory of the training scripts on the pod, never synced
pub const INSTALL_DIR_NAME: &str = "LoRA_Easy_Training_Scripts";

/// Filters for a tree transfer. Pulls only take first-level directories.
pub fn sync_rules(direction: SyncDirection) -> Vec<SyncRule> {
    let mut rules = vec![SyncRule::Exclude(INSTALL_DIR_NAME.to_string())];
    if direction == SyncDirection::Pull {
        rules.extend([
            SyncRule::Include("/*/".to_string()),
            SyncRule::Include("/*/**".to_string()),
            SyncRule::Exclude("*".to_string()),
        ]);
    }
    rules
}

/// Summary of a completed supervision run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub polls: u32,
    pub submitted_jobs: Vec<JobDescriptor>,
}

/// Collaborators of the monitor loop
pub struct MonitorContext<'a> {
    pub status: &'a dyn StatusSource,
    pub executor: &'a dyn RemoteExecutor,
    pub sync: &'a dyn FileSync,
    pub lifecycle: &'a PodLifecycleManager<'a>,
    pub clock: &'a dyn Clock,
}

pub struct TrainingMonitor<'a> {
    config: &'a RunConfig,
    session: &'a Session,
    ctx: MonitorContext<'a>,
}

impl<'a> TrainingMonitor<'a> {
    pub fn new(config: &'a RunConfig, session: &'a Session, ctx: MonitorContext<'a>) -> Self {
        Self {
            config,
            session,
            ctx,
        }
    }

    /// Runs the poll loop until training is over or a fatal error occurs.
    pub fn run(&self) -> Result<MonitorReport, Report<MonitorError>> {
        let mut queue = self.discover_jobs()?;
        let mut state = MonitorState::default();
        let mut report = MonitorReport::default();
        let monitor = &self.config.monitor;

        loop {
            let observation = if monitor.immediate {
                Observation::Forced
            } else {
                report.polls += 1;
                Observation::Polled(self.poll())
            };

            let transition = state.step(observation, monitor);
            self.log_transition(&transition, &state);

            match transition {
                Transition::Abort(reason) => return Err(self.abort(reason)),
                Transition::StoppedConfirmed => {
                    if !monitor.grace_period.is_zero() {
                        info!(
                            "Waiting for {} seconds before running commands",
                            monitor.grace_period.as_secs()
                        );
                        self.ctx.clock.sleep(monitor.grace_period);
                    }

                    if let Some(local) = &self.config.sync.pull_to {
                        self.transfer(SyncDirection::Pull, local)
                            .change_context(MonitorError::Sync)?;
                    }

                    match queue.take_next() {
                        Some(job) => {
                            self.submit(&job)?;
                            state.job_submitted();
                            report.submitted_jobs.push(job);
                            info!("{} training file(s) left", queue.len());
                        }
                        None => {
                            self.teardown(monitor.teardown)?;
                            return Ok(report);
                        }
                    }
                }
                ongoing if ongoing.is_ongoing() => {
                    if monitor.wait_for_training_start && !state.training_started {
                        info!("Waiting for training to start");
                    }
                    if self.config.sync.continuous {
                        self.continuous_sync();
                    }
                }
                _ => {}
            }

            self.ctx.clock.sleep(monitor.poll_interval);
        }
    }

    fn discover_jobs(&self) -> Result<JobQueue, Report<MonitorError>> {
        let Some(jobs) = &self.config.jobs else {
            return Ok(JobQueue::empty());
        };

        let found = JobDiscovery::new(self.ctx.executor, &jobs.directory)
            .discover(self.session)
            .change_context(MonitorError::JobDiscovery)?;

        if found.is_empty() {
            if self.config.monitor.teardown == TeardownPolicy::Terminate {
                return Err(Report::new(ConfigError::NoTrainingFiles {
                    directory: jobs.directory.clone(),
                })
                .change_context(MonitorError::Configuration));
            }
            warn!("No training files found in {}", jobs.directory);
        }

        Ok(JobQueue::new(found, jobs.order))
    }

    fn poll(&self) -> TrainingSignal {
        match self.ctx.status.is_training() {
            Ok(is_training) => TrainingSignal::reported(is_training),
            Err(e) => {
                warn!("Error retrieving training status: {e}");
                TrainingSignal::failed()
            }
        }
    }

    fn log_transition(&self, transition: &Transition, state: &MonitorState) {
        match transition {
            Transition::Training => info!("Training in progress"),
            Transition::StoppedPendingConfirm => {
                info!("Training stopped, waiting for one more iteration before running commands")
            }
            Transition::WaitingForStart => info!("Training not running"),
            Transition::StoppedConfirmed => info!("Training stopped"),
            Transition::PollFailed { consecutive_errors } => warn!(
                "Failed to get training status ({consecutive_errors}/{} consecutive errors)",
                self.config.monitor.max_consecutive_errors
            ),
            Transition::Abort(reason) => error!(
                ?reason,
                training_started = state.training_started,
                "Aborting training monitor"
            ),
        }
    }

    fn submit(&self, job: &JobDescriptor) -> Result<(), Report<MonitorError>> {
        let Some(config) = &self.config.jobs else {
            return Ok(());
        };
        JobSubmitter::new(self.ctx.executor, config)
            .submit(self.session, job)
            .change_context(MonitorError::JobSubmission {
                path: job.path.clone(),
            })
    }

    fn transfer(
        &self,
        direction: SyncDirection,
        local: &Path,
    ) -> Result<(), Report<SyncError>> {
        info!(
            "Transferring files ({direction}) between pod and {}",
            local.display()
        );
        match self
            .ctx
            .sync
            .sync_tree(self.session, direction, local, &sync_rules(direction))?
        {
            SyncOutcome::Synced => {}
            SyncOutcome::Skipped { reason } => warn!("Skipped file transfer: {reason}"),
        }
        Ok(())
    }

    /// Continuous sync failures never fail the run.
    fn continuous_sync(&self) {
        let Some(local) = &self.config.sync.pull_to else {
            return;
        };
        if let Err(e) = self.transfer(SyncDirection::Pull, local) {
            warn!("Continuous file transfer failed: {e:?}");
        }
    }

    fn teardown(&self, policy: TeardownPolicy) -> Result<(), Report<MonitorError>> {
        self.ctx
            .lifecycle
            .teardown(self.session, policy)
            .change_context(MonitorError::Teardown {
                pod_id: self.session.id.clone(),
            })
    }

    /// Best-effort teardown, then the fatal error to return.
    fn abort(&self, reason: AbortReason) -> Report<MonitorError> {
        let (policy, error) = match reason {
            AbortReason::StatusUnavailable => {
                (TeardownPolicy::Terminate, MonitorError::StatusUnavailable)
            }
            AbortReason::ErrorThresholdExceeded { consecutive_errors } => (
                self.config.monitor.teardown,
                MonitorError::ErrorThresholdExceeded { consecutive_errors },
            ),
        };

        error!("{error}");
        if let Err(e) = self.teardown(policy) {
            error!("Teardown after fatal error failed: {e:?}");
        }
        if policy != TeardownPolicy::Terminate {
            warn!(
                "Training may still be running, stop it with GET {}/stop_training",
                self.session.proxy_url(TRAINING_API_PORT)
            );
        }

        Report::new(error).attach_printable(format!("pod id: {}", self.session.id))
    }
}
