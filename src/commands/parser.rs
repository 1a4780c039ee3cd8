//! Command-line interface definition

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wallet-bridge", version, about = "Run and talk to the wallet worker process")]
pub struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "info,wallet_bridge=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the worker and submit operations read from stdin
    ///
    /// Each line is `<operation> [json-array-of-params]`, or
    /// `txns <page> [page-size]` for a deduplicated transaction page.
    Run {
        /// Worker program, overrides the config file
        #[arg(long)]
        worker: Option<String>,

        /// Arguments passed to the worker
        #[arg(last = true)]
        worker_args: Vec<String>,
    },

    /// Load, validate and print the effective configuration
    #[command(name = "check-config")]
    CheckConfig,
}

impl Cli {
    /// Parse `argv`; a missing subcommand means `run`.
    pub fn try_parse_command_from<I, T>(iter: I) -> Result<(Cli, Commands), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut cli = Cli::try_parse_from(iter)?;
        let command = cli.command.take().unwrap_or(Commands::Run {
            worker: None,
            worker_args: Vec::new(),
        });
        Ok((cli, command))
    }

    pub fn parse_command() -> (Cli, Commands) {
        match Self::try_parse_command_from(std::env::args_os()) {
            Ok(parsed) => parsed,
            Err(err) => err.exit(),
        }
    }
}
