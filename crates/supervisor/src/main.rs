use anyhow::Result;
use clap::Parser;
use supervisor::cmd;
use supervisor::config::Cli;
use supervisor::config::Commands;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(cli.log.log_dir.as_deref());

    tracing::info!("Starting supervisor {}", &**version::VERSION);

    match cli.command {
        Commands::Run(args) => cmd::run_training(*args),
        Commands::Start(args) => cmd::run_start(*args),
        Commands::Wait(args) => cmd::run_wait(*args),
        Commands::GpuTypes(args) => cmd::run_gpu_types(args),
    }
}
