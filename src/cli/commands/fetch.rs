//! Reference-data fetch: customers and active service items, printed and
//! snapshotted to JSON for configuring the Notion companies database.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use log::info;
use serde_json::json;

use crate::cli::app::FetchArgs;
use crate::config::Environment;

use super::build_client;

pub async fn fetch_command(credentials: &Path, environment: Environment, args: &FetchArgs) -> Result<()> {
    let mut client = build_client(credentials, environment)?;

    let customers = client.fetch_customers().await?;
    let items = client.fetch_active_items().await?;

    println!();
    println!(
        "  {} ({})",
        format!("Customers ({})", customers.len()).bright_blue().bold(),
        environment
    );
    for customer in &customers {
        let company = customer.company_name.as_deref().unwrap_or("-");
        println!(
            "    {} {} {}",
            format!("[{}]", customer.id).bright_yellow(),
            customer.name.white(),
            format!("({})", company).dimmed()
        );
    }

    println!();
    println!("  {}", format!("Active items ({})", items.len()).bright_blue().bold());
    for item in &items {
        let price = item
            .unit_price
            .map(|p| format!("${:.2}", p))
            .unwrap_or_else(|| "no listed price".to_string());
        println!(
            "    {} {} {}",
            format!("[{}]", item.id).bright_yellow(),
            item.name.white(),
            price.bright_green()
        );
    }

    if args.no_save {
        return Ok(());
    }

    let snapshot = json!({
        "fetched_at": Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "environment": environment.to_string(),
        "customers": customers,
        "items": items,
    });
    fs::write(&args.output, serde_json::to_string_pretty(&snapshot)?)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!("Wrote reference data snapshot to {}", args.output.display());

    println!();
    println!(
        "  {} {}",
        "✓ Snapshot written to".bright_green().bold(),
        args.output.display()
    );
    Ok(())
}
