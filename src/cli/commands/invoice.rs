//! Monthly invoice generation: active clients and billing configuration come
//! from Notion, hours are rolled up over the overage window, and one
//! consolidated draft invoice per client goes to QuickBooks.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use colored::Colorize;
use log::{info, warn};

use crate::auth::CredentialStore;
use crate::billing::{BillingBreakdown, build_client_invoice, format_billing_month};
use crate::cli::app::GenerateArgs;
use crate::config::Environment;
use crate::notion::NotionClient;

use super::build_client;

pub async fn generate_command(
    credentials: &Path,
    environment: Environment,
    args: &GenerateArgs,
) -> Result<()> {
    let invoice_date = match &args.invoice_date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("Invalid invoice date '{}' (expected YYYY-MM-DD)", raw))?,
        None => Local::now().date_naive(),
    };
    let bill_period = format_billing_month(&args.bill_month)?;
    let overage_month = month_of(&args.overage_start)?;

    let store = CredentialStore::new(credentials);
    let credential_set = store.load()?;
    let notion = NotionClient::from_credentials(&credential_set)?;
    let mut client = build_client(credentials, environment)?;

    println!();
    println!(
        "  {} {}",
        format!("Generating invoices for {}", bill_period).bright_blue().bold(),
        if args.dry_run { "(dry run)".bright_yellow().to_string() } else { String::new() }
    );
    println!(
        "    {}: {} to {}",
        "Overage window".dimmed(),
        args.overage_start.cyan(),
        args.overage_end.cyan()
    );
    println!(
        "    {}: {} (due {})",
        "Invoice date".dimmed(),
        invoice_date.format("%Y-%m-%d").to_string().cyan(),
        crate::billing::due_date(invoice_date).format("%Y-%m-%d").to_string().cyan()
    );

    let clients = notion.fetch_active_clients().await?;
    if clients.is_empty() {
        println!();
        println!("  {}", "No active clients found in Notion".bright_yellow().bold());
        return Ok(());
    }
    let totals = notion
        .fetch_time_totals(&args.overage_start, &args.overage_end)
        .await?;
    info!(
        "Billing {} active clients over {}..{}",
        clients.len(),
        args.overage_start,
        args.overage_end
    );

    // Fetch every referenced service price up front so one bad item id
    // surfaces before any invoice is created.
    let mut service_prices: HashMap<String, f64> = HashMap::new();
    for config in &clients {
        for service_id in &config.retainer_service_ids {
            if service_prices.contains_key(service_id) {
                continue;
            }
            match client.item_unit_price(service_id).await {
                Ok(price) => {
                    service_prices.insert(service_id.clone(), price);
                }
                Err(e) => warn!("Price lookup failed for item {}: {}", service_id, e),
            }
        }
    }

    let mut failures = 0usize;
    for config in &clients {
        let actual_hours = totals.get(&config.name).map(|h| h.total_hours).unwrap_or(0.0);
        let breakdown = BillingBreakdown::compute(config, actual_hours);

        println!();
        println!("  {}", config.name.bright_white().bold());
        println!(
            "    {}: {:.2} of {:.0} retainer hrs",
            "Hours".dimmed(),
            breakdown.actual_hours,
            config.monthly_retainer_hours
        );
        if breakdown.has_overage() {
            println!(
                "    {}: {:.2} hrs x ${:.2} = {}",
                "Overage".dimmed(),
                breakdown.overage_hours,
                config.overage_rate,
                format!("${:.2}", breakdown.overage_amount).bright_yellow()
            );
        } else if breakdown.under_retainer_hours > 0.0 {
            println!(
                "    {}: {:.2} hrs under retainer",
                "Overage".dimmed(),
                breakdown.under_retainer_hours
            );
        }

        let payload = match build_client_invoice(
            config,
            &breakdown,
            &service_prices,
            &args.bill_month,
            &overage_month,
            invoice_date,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                println!("    {} {}", "✗ Skipped:".bright_red().bold(), e.to_string().red());
                failures += 1;
                continue;
            }
        };

        println!(
            "    {}: {} line(s), total {}",
            "Invoice".dimmed(),
            payload.line.len(),
            format!("${:.2}", payload.total_amount()).bright_green()
        );

        if args.dry_run {
            println!("    {}", "– dry run, not created".dimmed());
            continue;
        }

        match client.create_invoice(&payload).await {
            Ok(summary) => {
                println!(
                    "    {} invoice {} (doc {})",
                    "✓ Created".bright_green().bold(),
                    summary.id,
                    summary.doc_number
                );
            }
            Err(e) => {
                println!("    {} {}", "✗ Create failed:".bright_red().bold(), e.to_string().red());
                failures += 1;
            }
        }
    }

    let summary = client.error_summary();
    if summary.total_errors > 0 {
        println!();
        println!("  {}", format!("{} API error(s) this run", summary.total_errors).bright_red().bold());
        for (category, count) in &summary.error_categories {
            println!("    {}: {}", category.to_string().dimmed(), count);
        }
        if !summary.intuit_tids.is_empty() {
            println!("    {}: {}", "intuit_tid".dimmed(), summary.intuit_tids.join(", "));
        }
    }

    if failures > 0 {
        anyhow::bail!("{} client(s) failed; see output above", failures);
    }
    Ok(())
}

/// `2025-10-07` -> `2025-10`.
fn month_of(date: &str) -> Result<String> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD)", date))?;
    Ok(parsed.format("%Y-%m").to_string())
}
