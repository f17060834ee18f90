//! Adapters binding the domain capabilities to real processes and services.

pub mod http;
pub mod rsync;
pub mod runpod;
pub mod ssh;
