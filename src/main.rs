use clap::Parser;
use std::process::ExitCode;
use tidyd::cli::{Cli, exit_code, run_cli};
use tidyd::config::AppConfig;
use tidyd::logging;
use tidyd::output::OutputFormatter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            OutputFormatter::error(&format!("Error loading configuration: {}", error));
            return ExitCode::from(exit_code(&error));
        }
    };
    logging::init(&config.logging.level);

    match run_cli(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::debug!(error = ?error, "command failed");
            OutputFormatter::error(&error.to_string());
            ExitCode::from(exit_code(&error))
        }
    }
}
