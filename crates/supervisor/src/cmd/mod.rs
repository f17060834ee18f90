//! Command layer - entry points for the supervisor subcommands

pub mod gpu_types;
pub mod run;
pub mod start;
pub mod wait;

use core::fmt::Debug;

use anyhow::anyhow;
use error_stack::Report;

pub use self::gpu_types::run_gpu_types;
pub use self::run::run_training;
pub use self::start::run_start;
pub use self::wait::run_wait;
use crate::config::ProviderArgs;
use crate::infrastructure::http::DEFAULT_REQUEST_TIMEOUT;
use crate::infrastructure::runpod::RunpodClient;

/// Keeps the full report, attachments included, in the returned error.
pub(crate) fn into_anyhow<C>(report: Report<C>) -> anyhow::Error
where
    Report<C>: Debug,
{
    anyhow!("{report:?}")
}

pub(crate) fn provider_client(args: &ProviderArgs) -> anyhow::Result<RunpodClient> {
    RunpodClient::new(&args.api_url, &args.api_key, DEFAULT_REQUEST_TIMEOUT)
        .map_err(into_anyhow)
}
