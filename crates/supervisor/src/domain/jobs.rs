//! Discovery and submission of training files on the pod.
//!
//! Both go through [`RemoteExecutor`]: discovery lists descriptor files, and
//! submission calls the pod-local training API with `curl`.

use std::collections::VecDeque;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;
use url::Url;

use super::session::Session;
use super::session::TRAINING_API_PORT;
use super::traits::CommandOutput;
use super::traits::RemoteExecutor;
use crate::config::JobConfig;
use crate::error::RemoteExecError;

/// A training file waiting on the pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    pub path: String,
}

impl JobDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Order in which discovered jobs are consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobOrder {
    /// Discovery order
    Fifo,
    /// Most recently discovered first
    Lifo,
}

/// Jobs pending submission. A job leaves the queue as soon as it is taken,
/// whether or not its submission succeeds.
#[derive(Debug, Clone)]
pub struct JobQueue {
    jobs: VecDeque<JobDescriptor>,
    order: JobOrder,
}

impl JobQueue {
    pub fn new(jobs: Vec<JobDescriptor>, order: JobOrder) -> Self {
        Self {
            jobs: jobs.into(),
            order,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), JobOrder::Fifo)
    }

    pub fn take_next(&mut self) -> Option<JobDescriptor> {
        match self.order {
            JobOrder::Fifo => self.jobs.pop_front(),
            JobOrder::Lifo => self.jobs.pop_back(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn ensure_success(
    argv: &[String],
    output: CommandOutput,
) -> Result<CommandOutput, Report<RemoteExecError>> {
    if output.success() {
        return Ok(output);
    }
    Err(Report::new(RemoteExecError::CommandFailed {
        command: argv.join(" "),
        exit_code: output.exit_code,
    })
    .attach_printable(format!("stdout: {}", output.stdout.trim()))
    .attach_printable(format!("stderr: {}", output.stderr.trim())))
}

pub struct JobDiscovery<'a> {
    executor: &'a dyn RemoteExecutor,
    directory: &'a str,
}

impl<'a> JobDiscovery<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, directory: &'a str) -> Self {
        Self {
            executor,
            directory,
        }
    }

    /// Lists `*.json` files in the training files directory, sorted by path.
    pub fn discover(
        &self,
        session: &Session,
    ) -> Result<Vec<JobDescriptor>, Report<RemoteExecError>> {
        let argv: Vec<String> = [
            "find",
            self.directory,
            "-maxdepth",
            "1",
            "-type",
            "f",
            "-name",
            "*.json",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let output = self.executor.execute(session, &argv)?;
        let output = ensure_success(&argv, output)?;

        let mut paths: Vec<&str> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        paths.sort_unstable();

        let jobs: Vec<JobDescriptor> = paths.into_iter().map(JobDescriptor::new).collect();
        info!("Found {} training file(s) in {}", jobs.len(), self.directory);
        for job in &jobs {
            debug!("training file: {}", job.path);
        }
        Ok(jobs)
    }
}

pub struct JobSubmitter<'a> {
    executor: &'a dyn RemoteExecutor,
    config: &'a JobConfig,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(executor: &'a dyn RemoteExecutor, config: &'a JobConfig) -> Self {
        Self { executor, config }
    }

    fn api_base() -> String {
        format!("http://localhost:{TRAINING_API_PORT}")
    }

    fn validate_argv(&self, job: &JobDescriptor) -> Vec<String> {
        vec![
            "curl".to_string(),
            "-sSf".to_string(),
            "-X".to_string(),
            "POST".to_string(),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
            "--data-binary".to_string(),
            format!("@{}", job.path),
            format!("{}/validate", Self::api_base()),
        ]
    }

    fn train_argv(&self) -> Result<Vec<String>, Report<RemoteExecError>> {
        let mut url = Url::parse(&format!("{}/train", Self::api_base())).change_context(
            RemoteExecError::Spawn {
                message: "invalid training API URL".to_string(),
            },
        )?;
        url.query_pairs_mut()
            .append_pair("train_mode", &self.config.train_mode)
            .append_pair("sdxl", if self.config.sdxl { "true" } else { "false" });

        Ok(vec!["curl".to_string(), "-sSf".to_string(), url.to_string()])
    }

    /// Validates the training file, then starts training with it.
    pub fn submit(
        &self,
        session: &Session,
        job: &JobDescriptor,
    ) -> Result<(), Report<RemoteExecError>> {
        info!("Validating training file {}", job.path);
        let argv = self.validate_argv(job);
        let output = self.executor.execute(session, &argv)?;
        ensure_success(&argv, output).attach_printable("training file failed validation")?;

        info!("Starting training with {}", job.path);
        let argv = self.train_argv()?;
        let output = self.executor.execute(session, &argv)?;
        ensure_success(&argv, output).attach_printable("training did not start")?;

        info!("Submitted training file {}", job.path);
        Ok(())
    }
}
