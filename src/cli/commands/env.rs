//! Pre-flight configuration check: everything a billing run needs, verified
//! without touching the network.

use std::path::Path;

use anyhow::Result;
use chrono::Local;
use colored::Colorize;

use crate::api::auth::is_expired;
use crate::auth::CredentialStore;

const NOTION_KEYS: [&str; 3] = ["NOTION_TOKEN", "NOTION_COMPANIES_DB", "NOTION_CLIENT_HOURS_DB"];

pub async fn check_command(credentials: &Path) -> Result<()> {
    println!();
    println!("  {}", "Configuration check".bright_blue().bold());
    println!();

    let store = CredentialStore::new(credentials);
    if !store.exists() {
        println!(
            "  {} {}",
            "✗ Credentials file not found:".bright_red().bold(),
            credentials.display()
        );
        println!("  {}", "Run 'qb-billing-cli auth setup' to create it.".dimmed());
        anyhow::bail!("configuration check failed");
    }
    println!("  {} {}", "✓ Credentials file".bright_green(), credentials.display());

    let set = store.load()?;
    let mut problems = 0usize;

    let missing = set.missing_session_keys();
    if missing.is_empty() {
        println!("  {} QuickBooks session keys present", "✓".bright_green());
    } else {
        println!(
            "  {} Missing QuickBooks keys: {}",
            "✗".bright_red(),
            missing.join(", ").red()
        );
        problems += 1;
    }

    if set.refresh_token_invalidated() {
        println!(
            "  {} Refresh token is invalidated; manual reauthorization required",
            "✗".bright_red()
        );
        problems += 1;
    }

    if is_expired(set.token_timestamp.as_deref(), Local::now().naive_local()) {
        println!(
            "  {} Access token is stale (will refresh on first request)",
            "•".bright_yellow()
        );
    } else {
        println!("  {} Access token is fresh", "✓".bright_green());
    }

    let missing_notion: Vec<&str> = NOTION_KEYS
        .iter()
        .filter(|key| set.get(key, "").is_empty())
        .copied()
        .collect();
    if missing_notion.is_empty() {
        println!("  {} Notion keys present", "✓".bright_green());
    } else {
        println!(
            "  {} Missing Notion keys: {}",
            "✗".bright_red(),
            missing_notion.join(", ").red()
        );
        problems += 1;
    }

    println!();
    if problems == 0 {
        println!("  {}", "✓ Ready for a billing run".bright_green().bold());
        Ok(())
    } else {
        println!(
            "  {}",
            format!("✗ {} problem(s) found", problems).bright_red().bold()
        );
        anyhow::bail!("configuration check failed");
    }
}
