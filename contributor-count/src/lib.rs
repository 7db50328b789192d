pub mod cli;
pub mod credentials;
pub mod load_config;

pub use cli::{run, Cli, Commands};
