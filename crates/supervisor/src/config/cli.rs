use std::path::PathBuf;

use clap::builder::OsStringValueParser;
use clap::builder::TypedValueParser;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::domain::jobs::JobOrder;
use crate::domain::lifecycle::ExistingPodPolicy;
use crate::infrastructure::runpod::DEFAULT_API_URL;

/// Largest accepted `--max-errors`
pub const MAX_ERRORS_LIMIT: u32 = 10_000;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a pod, supervise training on it and tear it down
    Run(Box<RunArgs>),
    /// Provision a pod and wait until it is reachable
    Start(Box<StartArgs>),
    /// Supervise training on an already running pod
    Wait(Box<WaitArgs>),
    /// List GPU types offered by the provider
    #[command(name = "gpu-types")]
    GpuTypes(ProviderArgs),
}

#[derive(Args, Clone, Debug)]
pub struct LogArgs {
    #[arg(
        long,
        global = true,
        env = "SUPERVISOR_LOG_DIR",
        value_hint = clap::ValueHint::DirPath,
        help = "Also write logs to a daily rotated file in this directory"
    )]
    pub log_dir: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct ProviderArgs {
    #[arg(
        long,
        env = "RUNPOD_API_KEY",
        hide_env_values = true,
        help = "RunPod API key"
    )]
    pub api_key: String,

    #[arg(
        long,
        default_value = DEFAULT_API_URL,
        help = "RunPod GraphQL endpoint"
    )]
    pub api_url: String,
}

#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    #[arg(long, default_value = "ht-lora-easy-training-scripts", help = "Pod name")]
    pub pod_name: String,

    #[arg(
        long,
        env = "VNC_PW",
        default_value = "password",
        hide_env_values = true,
        help = "Password of the pod's desktop and training API"
    )]
    pub vnc_password: String,
}

#[derive(Args, Clone, Debug)]
pub struct ProvisionArgs {
    #[arg(
        long,
        default_value = "happytentacle/ht-runpod-lora-easy-training-scripts:0.3",
        help = "Container image of the pod"
    )]
    pub image_name: String,

    #[arg(
        long,
        default_value = "NVIDIA RTX 6000 Ada Generation",
        help = "GPU type id, see `gpu-types`"
    )]
    pub gpu_type: String,

    #[arg(long, default_value = "0", help = "Persistent volume size in GB")]
    pub volume_gb: u32,

    #[arg(long, default_value = "60", help = "Container disk size in GB")]
    pub container_disk_gb: u32,

    #[arg(long, help = "Code the pod uses to receive the dataset on startup")]
    pub receive_code: Option<String>,

    #[arg(long, help = "Unzip the received dataset on startup")]
    pub unzip: bool,

    #[arg(long, help = "Checkpoint URL the pod downloads on startup")]
    pub checkpoint_url: Option<String>,

    #[arg(long, value_enum, help = "What to do with pods that already have this name")]
    pub existing: Option<ExistingPodPolicy>,

    #[arg(
        long,
        default_value = "900",
        help = "Give up if the pod is not reachable after X seconds"
    )]
    pub ready_timeout_sec: u64,

    #[arg(
        long,
        default_value = "5",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Wait for X seconds between readiness checks"
    )]
    pub ready_poll_sec: u64,
}

#[derive(Args, Clone, Debug)]
pub struct MonitorArgs {
    #[arg(long, help = "Terminate pod when training has completed")]
    pub terminate: bool,

    #[arg(
        long,
        conflicts_with = "terminate",
        help = "Restart pod when training has completed"
    )]
    pub restart: bool,

    #[arg(long, help = "Terminate pod if training status cannot be retrieved")]
    pub terminate_on_error: bool,

    #[arg(
        long,
        help = "Run commands immediately instead of waiting for training to complete"
    )]
    pub immediate: bool,

    #[arg(long, help = "Wait for training to start before running post-training commands")]
    pub wait_for_training_start: bool,

    #[arg(long, help = "Submit the training files found on the pod one after another")]
    pub submit_training_files: bool,

    #[arg(
        long,
        default_value = "/home/ht/training_files",
        help = "Directory on the pod containing training files"
    )]
    pub training_files_dir: String,

    #[arg(
        long,
        value_enum,
        default_value = "fifo",
        help = "Order in which discovered training files are submitted"
    )]
    pub job_order: JobOrder,

    #[arg(long, default_value = "lora", help = "Training mode passed to /train")]
    pub train_mode: String,

    #[arg(long, help = "Train against an SDXL base model")]
    pub sdxl: bool,

    #[arg(
        long,
        default_value = "0",
        help = "Wait for X additional seconds before running post-training commands"
    )]
    pub wait_for_sec: u64,

    #[arg(
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Wait for X seconds before each training status check iteration"
    )]
    pub iter_sec: u64,

    #[arg(
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u32).range(..=i64::from(MAX_ERRORS_LIMIT)),
        help = "Abort after more than X consecutive failed status checks"
    )]
    pub max_errors: u32,
}

#[derive(Args, Clone, Debug)]
pub struct SyncArgs {
    #[arg(
        long,
        env = "SUPERVISOR_SSH_KEY",
        default_value = "~/.ssh/id_ed25519",
        value_parser = OsStringValueParser::new().map(PathBuf::from),
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the private SSH key used for rsync and remote commands, empty for none"
    )]
    pub ssh_key: PathBuf,

    #[arg(long, default_value = "kasm-user", help = "SSH user on the pod")]
    pub ssh_user: String,

    #[arg(
        long,
        default_value = "/home/ht/training/",
        help = "Directory on the pod that files are synced to and from"
    )]
    pub remote_dir: String,

    #[arg(
        long,
        value_hint = clap::ValueHint::DirPath,
        help = "Run rsync to copy the specified local folder to the pod before training"
    )]
    pub rsync_from: Option<PathBuf>,

    #[arg(
        long,
        value_hint = clap::ValueHint::DirPath,
        help = "Run rsync to copy pod files to specified local folder"
    )]
    pub rsync_to: Option<PathBuf>,

    #[arg(long, help = "Run rsync every iteration")]
    pub continuous_rsync: bool,

    #[arg(long, help = "Use WSL to run rsync")]
    pub use_wsl: bool,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
    #[command(flatten)]
    pub session: SessionArgs,
    #[command(flatten)]
    pub provision: ProvisionArgs,
    #[command(flatten)]
    pub monitor: MonitorArgs,
    #[command(flatten)]
    pub sync: SyncArgs,
}

#[derive(Args, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
    #[command(flatten)]
    pub session: SessionArgs,
    #[command(flatten)]
    pub provision: ProvisionArgs,
}

#[derive(Args, Clone)]
pub struct WaitArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,
    #[command(flatten)]
    pub session: SessionArgs,
    #[command(flatten)]
    pub monitor: MonitorArgs,
    #[command(flatten)]
    pub sync: SyncArgs,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn wait_uses_documented_defaults() {
        let cli = Cli::try_parse_from(["supervisor", "wait", "--api-key", "k"])
            .expect("should parse");
        let Commands::Wait(args) = cli.command else {
            panic!("expected wait command");
        };
        assert_eq!(args.session.pod_name, "ht-lora-easy-training-scripts");
        assert_eq!(args.monitor.iter_sec, 10);
        assert_eq!(args.monitor.wait_for_sec, 0);
        assert_eq!(args.monitor.max_errors, 10);
        assert_eq!(args.monitor.job_order, JobOrder::Fifo);
        assert!(args.sync.rsync_to.is_none());
        assert_eq!(args.provider.api_url, DEFAULT_API_URL);
        if std::env::var_os("SUPERVISOR_SSH_KEY").is_none() {
            assert_eq!(args.sync.ssh_key, PathBuf::from("~/.ssh/id_ed25519"));
        }
    }

    #[test]
    fn zero_iter_sec_is_rejected() {
        let result = Cli::try_parse_from([
            "supervisor",
            "wait",
            "--api-key",
            "k",
            "--iter-sec",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn max_errors_is_bounded() {
        let parse = |max_errors: String| {
            Cli::try_parse_from([
                "supervisor",
                "wait",
                "--api-key",
                "k",
                "--max-errors",
                max_errors.as_str(),
            ])
        };
        assert!(parse(MAX_ERRORS_LIMIT.to_string()).is_ok());
        assert!(parse((MAX_ERRORS_LIMIT + 1).to_string()).is_err());
        assert!(parse(u32::MAX.to_string()).is_err());
    }

    #[test]
    fn empty_ssh_key_is_accepted() {
        let cli = Cli::try_parse_from(["supervisor", "wait", "--api-key", "k", "--ssh-key", ""])
            .expect("should parse");
        let Commands::Wait(args) = cli.command else {
            panic!("expected wait command");
        };
        assert_eq!(args.sync.ssh_key, PathBuf::new());
    }

    #[test]
    fn terminate_and_restart_conflict() {
        let result = Cli::try_parse_from([
            "supervisor",
            "wait",
            "--api-key",
            "k",
            "--terminate",
            "--restart",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn run_parses_existing_policy() {
        let cli = Cli::try_parse_from([
            "supervisor",
            "run",
            "--api-key",
            "k",
            "--existing",
            "restart",
            "--gpu-type",
            "NVIDIA A40",
        ])
        .expect("should parse");
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.provision.existing, Some(ExistingPodPolicy::Restart));
        assert_eq!(args.provision.gpu_type, "NVIDIA A40");
    }
}
