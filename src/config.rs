use std::fmt;
use std::str::FromStr;

/// Fixed Intuit OAuth2 token endpoint. Environment-independent: sandbox and
/// production realms both refresh against the same host.
pub const TOKEN_ENDPOINT: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

const SANDBOX_BASE_URL: &str = "https://sandbox-quickbooks.api.intuit.com";
const PRODUCTION_BASE_URL: &str = "https://quickbooks.api.intuit.com";

/// Which QuickBooks host the session talks to. Exactly one environment is
/// active per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => SANDBOX_BASE_URL,
            Environment::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("Unknown environment '{}' (expected sandbox or production)", other),
        }
    }
}

/// Resolved endpoint configuration for one session.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub environment: Environment,
    pub base_url: String,
    pub token_endpoint: String,
}

impl ApiConfig {
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            base_url: environment.base_url().to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Point every endpoint at an arbitrary host. Used by integration tests
    /// to run against a local mock server.
    pub fn with_overrides(environment: Environment, base_url: String, token_endpoint: String) -> Self {
        Self {
            environment,
            base_url,
            token_endpoint,
        }
    }

    /// `https://<host>/v3/company/<realm>/<path>`
    pub fn company_endpoint(&self, realm_id: &str, path: &str) -> String {
        format!("{}/v3/company/{}/{}", self.base_url, realm_id, path)
    }
}
