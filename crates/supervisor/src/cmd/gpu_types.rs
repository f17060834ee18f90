use anyhow::Result;

use super::into_anyhow;
use super::provider_client;
use crate::config::ProviderArgs;
use crate::domain::traits::PodProvider;

pub fn run_gpu_types(args: ProviderArgs) -> Result<()> {
    let provider = provider_client(&args)?;
    let mut gpu_types = provider.list_gpu_types().map_err(into_anyhow)?;
    gpu_types.sort_by(|a, b| a.id.cmp(&b.id));

    for gpu in gpu_types {
        match gpu.memory_in_gb {
            Some(memory) => println!("{} ({}, {memory} GB)", gpu.id, gpu.display_name),
            None => println!("{} ({})", gpu.id, gpu.display_name),
        }
    }
    Ok(())
}
