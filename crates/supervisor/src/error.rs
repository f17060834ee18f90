//! Error types for every layer of the supervisor.
//!
//! Each enum is used as an `error_stack::Report` context; lower layers are
//! wrapped with `change_context` when they cross a layer boundary.

use core::error::Error;

use derive_more::Display;

/// Failure to obtain a training signal from the pod.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// Endpoint unreachable, timed out, or the connection dropped
    #[display("Transport error: {message}")]
    Transport { message: String },

    /// Endpoint answered with something other than HTTP 200
    #[display("Unexpected status code {status}")]
    UnexpectedStatus { status: u16 },

    /// Endpoint answered 200 but the body was not `{"training": <bool>}`
    #[display("Malformed training status payload: {message}")]
    Protocol { message: String },
}

impl Error for StatusError {}

/// Failure to run a command on the pod.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum RemoteExecError {
    /// The local transport (ssh) could not be started
    #[display("Failed to spawn remote command: {message}")]
    Spawn { message: String },

    /// The pod exposes no ssh endpoint or no key is configured
    #[display("Remote execution unavailable: {message}")]
    Unavailable { message: String },

    /// The command ran but exited non-zero
    #[display("Remote command `{command}` failed with exit code {exit_code:?}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },
}

impl Error for RemoteExecError {}

/// Failure to synchronise a directory tree.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[display("Failed to spawn rsync: {message}")]
    Spawn { message: String },

    #[display("rsync exited with code {exit_code:?}")]
    Failed { exit_code: Option<i32> },
}

impl Error for SyncError {}

/// Failure talking to the compute-provider control plane.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport or HTTP level failure
    #[display("Provider request failed: {message}")]
    Request { message: String },

    /// The API answered with GraphQL errors
    #[display("Provider API error: {message}")]
    Api { message: String },

    /// The API answered with an unexpected payload
    #[display("Failed to decode provider response: {message}")]
    Decode { message: String },

    #[display("GPU type `{gpu_type}` not found")]
    GpuTypeNotFound { gpu_type: String },

    #[display("Pod `{name}` not found")]
    PodNotFound { name: String },
}

impl Error for ProviderError {}

/// Failure waiting for a pod to become reachable.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[display("Pod {pod_id} not ready after {waited_secs}s")]
    Timeout { pod_id: String, waited_secs: u64 },
}

impl Error for ReadinessError {}

/// Invalid combination of options, detected before any remote interaction.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[display("Conflicting options: {message}")]
    ConflictingPolicy { message: String },

    #[display("Missing credential: {message}")]
    MissingCredential { message: String },

    #[display("No training files found in {directory}")]
    NoTrainingFiles { directory: String },
}

impl Error for ConfigError {}

/// Fatal outcome of the training monitor.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[display("Failed to get training status {consecutive_errors} times in a row, aborting")]
    ErrorThresholdExceeded { consecutive_errors: u32 },

    #[display("Training status could not be retrieved")]
    StatusUnavailable,

    #[display("Invalid monitor configuration")]
    Configuration,

    #[display("Failed to discover training files")]
    JobDiscovery,

    #[display("Failed to submit training file {path}")]
    JobSubmission { path: String },

    #[display("Failed to transfer files")]
    Sync,

    #[display("Failed to tear down pod {pod_id}")]
    Teardown { pod_id: String },
}

impl Error for MonitorError {}
