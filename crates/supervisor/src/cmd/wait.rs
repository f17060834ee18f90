use anyhow::Result;
use tracing::info;

use super::into_anyhow;
use super::provider_client;
use crate::config::RunConfig;
use crate::config::SyncConfig;
use crate::config::WaitArgs;
use crate::domain::lifecycle::PodLifecycleManager;
use crate::domain::monitor::MonitorContext;
use crate::domain::monitor::MonitorReport;
use crate::domain::monitor::TrainingMonitor;
use crate::domain::session::Session;
use crate::domain::session::TRAINING_API_PORT;
use crate::domain::traits::PodProvider;
use crate::domain::traits::SystemClock;
use crate::infrastructure::http::StatusClient;
use crate::infrastructure::http::DEFAULT_REQUEST_TIMEOUT;
use crate::infrastructure::rsync::RsyncBridge;
use crate::infrastructure::ssh::SshExecutor;
use crate::infrastructure::ssh::SshTransport;

pub(crate) fn ssh_transport(sync: &SyncConfig) -> Option<SshTransport> {
    sync.ssh_key.clone().map(|key| SshTransport {
        key,
        user: sync.ssh_user.clone(),
        use_wsl: sync.use_wsl,
    })
}

pub(crate) fn file_sync(sync: &SyncConfig) -> RsyncBridge {
    RsyncBridge::new(ssh_transport(sync), sync.remote_dir.clone())
}

/// Monitors training on `session` until it ends, then applies the teardown policy.
pub(crate) fn supervise(
    provider: &dyn PodProvider,
    config: &RunConfig,
    session: &Session,
) -> Result<MonitorReport> {
    let status = StatusClient::new(
        &session.proxy_url(TRAINING_API_PORT),
        &config.password,
        DEFAULT_REQUEST_TIMEOUT,
    )
    .map_err(into_anyhow)?;
    let executor = SshExecutor::new(ssh_transport(&config.sync));
    let sync = file_sync(&config.sync);
    let lifecycle = PodLifecycleManager::new(provider);

    let monitor = TrainingMonitor::new(
        config,
        session,
        MonitorContext {
            status: &status,
            executor: &executor,
            sync: &sync,
            lifecycle: &lifecycle,
            clock: &SystemClock,
        },
    );
    let report = monitor.run().map_err(into_anyhow)?;

    info!(
        polls = report.polls,
        "Supervision finished, {} training file(s) submitted",
        report.submitted_jobs.len()
    );
    Ok(report)
}

pub fn run_wait(args: WaitArgs) -> Result<()> {
    let config = RunConfig::new(&args.session, &args.monitor, &args.sync).map_err(into_anyhow)?;
    let provider = provider_client(&args.provider)?;

    let session = PodLifecycleManager::new(&provider)
        .find_one(&config.pod_name)
        .map_err(into_anyhow)?;
    info!("Supervising pod {session}");

    supervise(&provider, &config, &session)?;
    Ok(())
}
