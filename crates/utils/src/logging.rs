//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const LOG_FILE_PREFIX: &str = "supervisor.log";
const MAX_LOG_FILES: usize = 7;

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// stderr layer shared by every binary in the workspace
pub fn get_fmt_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    layer().with_writer(std::io::stderr).with_target(true)
}

/// initiate the global tracing subscriber
///
/// When `log_dir` is given, events are additionally written to a daily rotated
/// file in that directory. The returned guard must be held until exit so the
/// non-blocking writer flushes.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = get_fmt_layer().with_filter(env_filter());

    let Some(log_dir) = log_dir else {
        registry().with(stderr_layer).init();
        return None;
    };

    let appender = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
    {
        Ok(appender) => appender,
        Err(e) => {
            registry().with(stderr_layer).init();
            tracing::warn!(
                "failed to create log file in {}: {e}, logging to stderr only",
                log_dir.display()
            );
            return None;
        }
    };

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let file_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter());

    registry().with(stderr_layer).with(file_layer).init();
    Some(file_guard)
}
