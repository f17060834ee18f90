use anyhow::Result;
use error_stack::ResultExt;
use tracing::warn;

use super::into_anyhow;
use super::provider_client;
use super::start::provision;
use super::wait::file_sync;
use super::wait::supervise;
use crate::config::ProvisionConfig;
use crate::config::RunArgs;
use crate::config::RunConfig;
use crate::domain::monitor::sync_rules;
use crate::domain::traits::FileSync;
use crate::domain::traits::SyncDirection;
use crate::domain::traits::SyncOutcome;
use crate::error::MonitorError;

/// Provisions a pod, optionally pushes local files, then supervises training.
pub fn run_training(args: RunArgs) -> Result<()> {
    // option conflicts are rejected before anything is provisioned
    let config = RunConfig::new(&args.session, &args.monitor, &args.sync).map_err(into_anyhow)?;
    let provision_config = ProvisionConfig::new(&args.session, &args.provision);
    let provider = provider_client(&args.provider)?;

    let session = provision(&provider, &provision_config)?;

    if let Some(local) = &config.sync.push_from {
        let outcome = file_sync(&config.sync)
            .sync_tree(
                &session,
                SyncDirection::Push,
                local,
                &sync_rules(SyncDirection::Push),
            )
            .change_context(MonitorError::Sync)
            .attach_printable_lazy(|| format!("local path: {}", local.display()))
            .map_err(into_anyhow)?;
        if let SyncOutcome::Skipped { reason } = outcome {
            warn!("Skipped file transfer: {reason}");
        }
    }

    supervise(&provider, &config, &session)?;
    Ok(())
}
