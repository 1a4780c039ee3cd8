//! CLI command handling

pub mod parser;
pub mod run;

pub use parser::*;

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Load the config for `cli`, applying `run --worker` overrides.
pub fn load_config(cli: &Cli, command: &Commands) -> Result<BridgeConfig, BridgeError> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    if let Commands::Run {
        worker,
        worker_args,
    } = command
    {
        if let Some(program) = worker {
            config.worker.program = program.clone();
        }
        if !worker_args.is_empty() {
            config.worker.args = worker_args.clone();
        }
        config.validate()?;
    }
    Ok(config)
}
