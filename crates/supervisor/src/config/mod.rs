pub mod cli;
pub mod run;

pub use cli::*;
pub use run::*;
