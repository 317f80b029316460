use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Environment;

#[derive(Parser)]
#[command(name = "qb-billing-cli")]
#[command(about = "Monthly retainer billing against QuickBooks Online")]
pub struct Cli {
    /// Path to the flat KEY=VALUE credentials file
    #[arg(long, global = true, default_value = "credentials.config")]
    pub credentials: PathBuf,

    /// QuickBooks environment (sandbox or production)
    #[arg(long, global = true, default_value = "sandbox")]
    pub environment: Environment,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// OAuth session management
    Auth(AuthCommands),
    /// Fetch customers and service items for billing configuration
    Fetch(FetchArgs),
    /// Invoice generation
    Invoice(InvoiceCommands),
    /// Configuration checks
    Env(EnvCommands),
}

#[derive(Args)]
pub struct AuthCommands {
    #[command(subcommand)]
    pub command: AuthSubcommands,
}

#[derive(Subcommand)]
pub enum AuthSubcommands {
    /// Show token state and whether manual reauthorization is needed
    Status,
    /// Interactively write the credentials file
    Setup,
    /// Probe the QuickBooks connection end to end
    Validate,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Where to write the reference-data snapshot
    #[arg(long, default_value = "qb_reference_data.json")]
    pub output: PathBuf,

    /// Print the listings without writing the snapshot file
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Args)]
pub struct InvoiceCommands {
    #[command(subcommand)]
    pub command: InvoiceSubcommands,
}

#[derive(Subcommand)]
pub enum InvoiceSubcommands {
    /// Build one consolidated draft invoice per active client
    Generate(GenerateArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// First day of the overage window (YYYY-MM-DD)
    #[arg(long)]
    pub overage_start: String,

    /// Last day of the overage window (YYYY-MM-DD)
    #[arg(long)]
    pub overage_end: String,

    /// Month being billed (YYYY-MM)
    #[arg(long)]
    pub bill_month: String,

    /// Invoice date (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub invoice_date: Option<String>,

    /// Compute and print everything without creating invoices
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct EnvCommands {
    #[command(subcommand)]
    pub command: EnvSubcommands,
}

#[derive(Subcommand)]
pub enum EnvSubcommands {
    /// Verify the credentials file has everything a billing run needs
    Check,
}
