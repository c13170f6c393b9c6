use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use elpris::cli::prices::{DEFAULT_HOURS, OutputFormat, PricesArgs};
use elpris::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display tax-inclusive prices for the coming hours
    Prices {
        /// Number of hours from the current hour
        #[arg(long, default_value_t = DEFAULT_HOURS, allow_negative_numbers = true)]
        hours: i64,

        /// Print period and price only, as JSON
        #[arg(long, conflicts_with = "json")]
        simple: bool,

        /// Print full price records as JSON
        #[arg(long)]
        json: bool,

        /// Show spot prices without tariffs if tariffs cannot be fetched
        #[arg(long)]
        ignore_missing_tariffs: bool,
    },
    /// Serve prices over HTTP
    Serve {
        /// Port to listen on, overriding the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl From<Commands> for elpris::AppCommand {
    fn from(cmd: Commands) -> elpris::AppCommand {
        match cmd {
            Commands::Prices {
                hours,
                simple,
                json,
                ignore_missing_tariffs,
            } => {
                let format = if simple {
                    OutputFormat::Simple
                } else if json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Table
                };
                elpris::AppCommand::Prices(PricesArgs {
                    hours,
                    format,
                    ignore_missing_tariffs,
                })
            }
            Commands::Serve { port } => elpris::AppCommand::Serve { port },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => elpris::cli::setup::setup_at_path(path),
            None => elpris::cli::setup::setup(),
        },
        Some(cmd) => elpris::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
