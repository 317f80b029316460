use anyhow::Result;
use clap::Parser;
use log::info;

use qb_billing_cli::cli::Cli;
use qb_billing_cli::cli::app::{AuthSubcommands, Commands, EnvSubcommands, InvoiceSubcommands};
use qb_billing_cli::cli::commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Log to a file (truncated each run) so command output stays clean.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("qb-billing-cli.log")?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();

    let cli = Cli::parse();
    info!("Starting qb-billing-cli ({})", cli.environment);

    match &cli.command {
        Commands::Auth(auth) => match &auth.command {
            AuthSubcommands::Status => {
                commands::status_command(&cli.credentials, cli.environment).await?;
            }
            AuthSubcommands::Setup => {
                commands::setup_command(&cli.credentials, cli.environment).await?;
            }
            AuthSubcommands::Validate => {
                commands::validate_command(&cli.credentials, cli.environment).await?;
            }
        },
        Commands::Fetch(args) => {
            commands::fetch_command(&cli.credentials, cli.environment, args).await?;
        }
        Commands::Invoice(invoice) => match &invoice.command {
            InvoiceSubcommands::Generate(args) => {
                commands::generate_command(&cli.credentials, cli.environment, args).await?;
            }
        },
        Commands::Env(env) => match &env.command {
            EnvSubcommands::Check => {
                commands::check_command(&cli.credentials).await?;
            }
        },
    }

    Ok(())
}
