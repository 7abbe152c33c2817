mod config;
mod telemetry;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use sheet_sync::config::ValidationError;
use sheet_sync::errors::BridgeError;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::TelemetryError;

#[derive(Parser)]
#[command(about = "Writes Jira Flow B issue fields into a spreadsheet row")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the webhook and admin listeners
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
}

fn load_config(path: &std::path::Path) -> Result<Config, CliError> {
    let config = Config::from_file(path)?;
    config.bridge.validate()?;
    Ok(config)
}

fn run(path: &std::path::Path) -> Result<(), CliError> {
    let config = load_config(path)?;

    let _sentry = telemetry::init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        telemetry::init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    tracing::info!(sheet = %config.bridge.spreadsheet.sheet_name, "Starting flowbridge");
    runtime.block_on(sheet_sync::run(config.bridge))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Run { config } => run(config),
        CliCommand::CheckConfig { config } => load_config(config).map(|_| {
            println!("{}: ok", config.display());
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "flowbridge exited with error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["flowbridge", "check-config", "--config", "a.yaml"]).unwrap();
        assert!(matches!(cli.command, CliCommand::CheckConfig { ref config } if config == &PathBuf::from("a.yaml")));

        assert!(Cli::try_parse_from(["flowbridge", "run"]).is_err());
    }

    #[test]
    fn check_config_reports_validation_errors() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
bridge:
    listener: {{host: 0.0.0.0, port: 0}}
    admin_listener: {{host: 127.0.0.1, port: 3001}}
    spreadsheet:
        sheet_name: Orders
        backend: {{type: memory}}
"#
        )
        .unwrap();

        assert!(matches!(
            load_config(tmp.path()),
            Err(CliError::Validation(ValidationError::InvalidPort))
        ));
    }

    #[test]
    fn load_config_rejects_columns_past_sheet_end() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
bridge:
    listener: {{host: 0.0.0.0, port: 3000}}
    admin_listener: {{host: 127.0.0.1, port: 3001}}
    spreadsheet:
        sheet_name: Orders
        backend: {{type: memory}}
    reconcile:
        columns: {{strategy: fixed_offset, start_column: FXSHRXW}}
"#
        )
        .unwrap();

        assert!(matches!(
            load_config(tmp.path()),
            Err(CliError::Validation(ValidationError::ColumnsOutOfRange { .. }))
        ));
    }
}
