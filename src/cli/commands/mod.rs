pub mod auth;
pub mod env;
pub mod fetch;
pub mod invoice;

use std::path::Path;

use anyhow::Result;

use crate::api::{AuthManager, QuickBooksClient};
use crate::auth::CredentialStore;
use crate::config::{ApiConfig, Environment};

pub use auth::{setup_command, status_command, validate_command};
pub use env::check_command;
pub use fetch::fetch_command;
pub use invoice::generate_command;

/// Wire up the authenticated client every command goes through.
fn build_client(credentials: &Path, environment: Environment) -> Result<QuickBooksClient> {
    let store = CredentialStore::new(credentials);
    let config = ApiConfig::for_environment(environment);
    let auth = AuthManager::new(store, config)?;
    Ok(QuickBooksClient::new(auth))
}
