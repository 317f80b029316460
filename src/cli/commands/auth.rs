//! OAuth session commands: status, interactive setup, connection probe.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use dialoguer::{Confirm, Input, Password};
use log::info;

use crate::api::TokenState;
use crate::api::auth::{AuthManager, current_timestamp};
use crate::auth::{CredentialSet, CredentialStore};
use crate::config::{ApiConfig, Environment};

use super::build_client;

/// Show the credential file contents (redacted), the token state, and whether
/// the operator needs to re-run the authorization flow.
pub async fn status_command(credentials: &Path, environment: Environment) -> Result<()> {
    let store = CredentialStore::new(credentials);
    let config = ApiConfig::for_environment(environment);
    let mut auth = AuthManager::new(store, config)?;

    println!();
    println!("  {}", "QuickBooks Authentication Status".bright_blue().bold());
    println!("  {}", "================================".bright_blue());
    println!();
    println!("    {}: {}", "Environment".dimmed(), environment.to_string().cyan());
    println!("    {}: {}", "Credentials".dimmed(), credentials.display().to_string().cyan());

    let missing = auth.credentials().missing_session_keys();
    if !missing.is_empty() {
        println!();
        println!(
            "  {} {}",
            "✗ Missing keys:".bright_red().bold(),
            missing.join(", ").red()
        );
        return Ok(());
    }

    let timestamp = auth
        .credentials()
        .token_timestamp
        .clone()
        .unwrap_or_else(|| "<unset>".to_string());
    println!("    {}: {}", "Token timestamp".dimmed(), timestamp.white());

    let state = match auth.state() {
        TokenState::Fresh => "fresh".bright_green(),
        TokenState::Stale => "stale".bright_yellow(),
        TokenState::Refreshing => "refreshing".bright_yellow(),
        TokenState::Invalid => "invalid".bright_red(),
    };
    println!("    {}: {}", "Token state".dimmed(), state.bold());

    println!();
    if auth.requires_manual_reauth().await {
        println!("  {}", "✗ Manual reauthorization required".bright_red().bold());
        println!();
        println!("{}", auth.reauth_instructions());
    } else {
        println!("  {}", "✓ Session is usable".bright_green().bold());
    }
    Ok(())
}

/// Interactive first-time setup. Existing unknown keys (Notion configuration)
/// survive the rewrite.
pub async fn setup_command(credentials: &Path, environment: Environment) -> Result<()> {
    let store = CredentialStore::new(credentials);

    let mut set = if store.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "{} already exists. Overwrite its QuickBooks keys?",
                credentials.display()
            ))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("  {}", "Setup cancelled".yellow());
            return Ok(());
        }
        store.load()?
    } else {
        CredentialSet::default()
    };

    println!();
    println!(
        "  {} ({} environment)",
        "QuickBooks OAuth setup".bright_blue().bold(),
        environment
    );
    println!(
        "  {}",
        "Values come from the Intuit Developer Console OAuth2 playground.".dimmed()
    );
    println!();

    let client_id: String = Input::new().with_prompt("Client ID").interact_text()?;
    let client_secret = Password::new().with_prompt("Client secret").interact()?;
    let access_token = Password::new().with_prompt("Access token").interact()?;
    let refresh_token = Password::new().with_prompt("Refresh token").interact()?;
    let realm_id: String = Input::new().with_prompt("Realm (company) ID").interact_text()?;

    set.client_id = Some(client_id);
    set.client_secret = Some(client_secret);
    set.access_token = Some(access_token);
    set.refresh_token = Some(refresh_token);
    set.realm_id = Some(realm_id);
    set.token_timestamp = Some(current_timestamp());

    store.save(&set)?;
    info!("Credentials written via interactive setup");
    println!();
    println!(
        "  {} {}",
        "✓ Credentials saved to".bright_green().bold(),
        credentials.display()
    );
    Ok(())
}

/// End-to-end probe: refresh if needed, then read company info through the
/// full retry/classification path.
pub async fn validate_command(credentials: &Path, environment: Environment) -> Result<()> {
    let mut client = build_client(credentials, environment)?;

    println!();
    match client.validate_connection().await {
        Ok(()) => {
            println!(
                "  {} ({})",
                "✓ QuickBooks connection OK".bright_green().bold(),
                environment
            );
            Ok(())
        }
        Err(e) => {
            println!("  {} {}", "✗ Connection failed:".bright_red().bold(), e.to_string().red());
            let summary = client.error_summary();
            if summary.total_errors > 0 {
                println!();
                for (category, count) in &summary.error_categories {
                    println!("    {}: {}", category.to_string().dimmed(), count);
                }
                if !summary.intuit_tids.is_empty() {
                    println!(
                        "    {}: {}",
                        "intuit_tid".dimmed(),
                        summary.intuit_tids.join(", ")
                    );
                }
            }
            Err(e)
        }
    }
}
