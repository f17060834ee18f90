pub mod jobs;
pub mod lifecycle;
pub mod mock;
pub mod monitor;
pub mod readiness;
pub mod session;
pub mod traits;
