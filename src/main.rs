use std::process::ExitCode;
use wallet_bridge::commands::{self, run, Cli, Commands};
use wallet_bridge::utils::logger::init_logger;

#[tokio::main]
async fn main() -> ExitCode {
    let (cli, command) = Cli::parse_command();

    if let Err(err) = init_logger(cli.log_level.as_deref(), cli.log_file.clone()) {
        eprintln!("Failed to initialise logging: {err}");
        return ExitCode::from(1);
    }

    match main_impl(cli, command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

async fn main_impl(cli: Cli, command: Commands) -> anyhow::Result<ExitCode> {
    let config = commands::load_config(&cli, &command)?;

    match command {
        Commands::Run { .. } => match run::run(config).await {
            Ok(code) => Ok(ExitCode::from(code as u8)),
            Err(err) if err.is_fatal() => {
                eprintln!("{}", err.user_message());
                Ok(ExitCode::from(2))
            }
            Err(err) => Err(err.into()),
        },
        Commands::CheckConfig => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
