use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use thiserror::Error;

use crate::auth::credentials::{CredentialSet, CredentialStore};
use crate::config::ApiConfig;

use super::models::{TokenErrorBody, TokenResponse};

/// Provider access tokens live for 60 minutes; treat anything older than 55
/// as expired so a token cannot lapse mid-request.
const TOKEN_LIFETIME_BUFFER_MINUTES: i64 = 55;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Where the cached access token stands. Driven by the freshness check and
/// the refresh protocol rather than implied by method call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Access token is within its lifetime and usable as-is.
    Fresh,
    /// Access token is past the freshness window; a refresh is needed.
    Stale,
    /// A refresh request is in flight.
    Refreshing,
    /// The credential set is unrecoverable; a human must re-authorize.
    Invalid,
}

/// Refresh-protocol failures. Fatal variants abort the enclosing call and
/// propagate up for human-facing reporting; transient ones may be retried by
/// a later call.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("missing credentials required for token refresh (client id, client secret, or refresh token)")]
    MissingCredentials,
    #[error("refresh token rejected by provider (invalid_grant) - manual reauthorization required")]
    InvalidGrant,
    #[error("refresh token has expired - manual reauthorization required")]
    ExpiredRefreshToken,
    #[error("client id or client secret rejected by provider (HTTP 401)")]
    UnauthorizedClient,
    #[error("token request rejected by CSRF protection (HTTP 403)")]
    CsrfRejected,
    #[error("provider server error during token refresh (HTTP {0})")]
    ProviderServerError(u16),
    #[error("network error during token refresh: {0}")]
    Network(String),
    #[error("failed to persist refreshed credentials: {0}")]
    Store(String),
    #[error("unexpected token refresh failure (HTTP {status}): {body}")]
    Unknown { status: u16, body: String },
}

impl RefreshError {
    /// Transient failures may succeed on a later call; everything else needs
    /// corrected credentials or human intervention first.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RefreshError::ProviderServerError(_) | RefreshError::Network(_)
        )
    }
}

/// Pure freshness decision: a missing or unparsable timestamp counts as
/// expired, otherwise expiry is age beyond the 55-minute window.
pub fn is_expired(token_timestamp: Option<&str>, now: NaiveDateTime) -> bool {
    let Some(raw) = token_timestamp else {
        return true;
    };
    match NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT) {
        Ok(token_time) => {
            now.signed_duration_since(token_time) > chrono::Duration::minutes(TOKEN_LIFETIME_BUFFER_MINUTES)
        }
        Err(_) => true,
    }
}

/// Current local time in the format `TOKEN_TIMESTAMP` is stored in.
pub fn current_timestamp() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

/// Owns the credential set and the token lifecycle: freshness checks, the
/// refresh exchange against the fixed Intuit token endpoint, persistence of
/// rotated tokens, and detection of unrecoverable credential sets.
pub struct AuthManager {
    store: CredentialStore,
    credentials: CredentialSet,
    config: ApiConfig,
    http: reqwest::Client,
    state: TokenState,
}

impl AuthManager {
    pub fn new(store: CredentialStore, config: ApiConfig) -> anyhow::Result<Self> {
        let credentials = store.load()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("qb-billing-cli/1.0")
            .build()?;

        let state = if credentials.refresh_token_invalidated() {
            TokenState::Invalid
        } else if is_expired(credentials.token_timestamp.as_deref(), Local::now().naive_local()) {
            TokenState::Stale
        } else {
            TokenState::Fresh
        };

        Ok(Self {
            store,
            credentials,
            config,
            http,
            state,
        })
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credentials.access_token.as_deref()
    }

    pub fn realm_id(&self) -> anyhow::Result<&str> {
        self.credentials
            .realm_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing INTUIT_REALM_ID in credentials"))
    }

    /// Is the cached access token past its freshness window right now?
    pub fn is_stale(&self) -> bool {
        is_expired(self.credentials.token_timestamp.as_deref(), Local::now().naive_local())
    }

    /// Force the next freshness check to see a stale token. Used by the
    /// executor after a mid-call 401. In-memory only.
    pub fn force_stale(&mut self) {
        self.credentials.force_stale();
        self.state = TokenState::Stale;
    }

    /// Refresh if the cached token is stale, otherwise leave it alone.
    pub async fn ensure_fresh(&mut self) -> Result<(), RefreshError> {
        if self.is_stale() {
            self.refresh().await
        } else {
            self.state = TokenState::Fresh;
            Ok(())
        }
    }

    /// Exchange the refresh token for a new access/refresh token pair and
    /// persist the rotated pair before returning.
    pub async fn refresh(&mut self) -> Result<(), RefreshError> {
        if self.credentials.refresh_token_invalidated() {
            // Sentinel short-circuit: the provider already told us this grant
            // is dead, so do not burn a network call finding out again.
            self.state = TokenState::Invalid;
            return Err(RefreshError::InvalidGrant);
        }

        let (refresh_token, client_id, client_secret) = match (
            self.credentials.refresh_token.clone(),
            self.credentials.client_id.clone(),
            self.credentials.client_secret.clone(),
        ) {
            (Some(r), Some(i), Some(s)) if !r.trim().is_empty() && !i.trim().is_empty() && !s.trim().is_empty() => {
                (r, i, s)
            }
            _ => {
                self.state = TokenState::Invalid;
                return Err(RefreshError::MissingCredentials);
            }
        };

        self.state = TokenState::Refreshing;
        info!("Refreshing QuickBooks access token");

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .basic_auth(&client_id, Some(&client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.state = TokenState::Stale;
                warn!("Token refresh network failure: {}", e);
                return Err(RefreshError::Network(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        debug!("Token refresh response status: {}", status);

        if status == 200 {
            let token: TokenResponse = match response.json().await {
                Ok(token) => token,
                Err(e) => {
                    self.state = TokenState::Stale;
                    return Err(RefreshError::Unknown {
                        status,
                        body: format!("unparsable token response: {}", e),
                    });
                }
            };

            // The provider rotates the refresh token on every exchange; the
            // old one is dead the moment this response arrives.
            self.credentials.access_token = Some(token.access_token);
            self.credentials.refresh_token = Some(token.refresh_token);
            self.credentials.token_timestamp = Some(current_timestamp());

            if let Err(e) = self.store.save(&self.credentials) {
                self.state = TokenState::Stale;
                return Err(RefreshError::Store(e.to_string()));
            }

            self.state = TokenState::Fresh;
            info!("Token refreshed and persisted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.classify_refresh_failure(status, &body))
    }

    fn classify_refresh_failure(&mut self, status: u16, body: &str) -> RefreshError {
        warn!("Token refresh failed: HTTP {}", status);
        match status {
            400 => {
                let parsed: TokenErrorBody = serde_json::from_str(body).unwrap_or_default();
                if parsed.error == "invalid_grant" {
                    // Sticky: overwrite the refresh token so future calls
                    // fail fast instead of hammering the token endpoint.
                    self.credentials.invalidate_refresh_token();
                    if let Err(e) = self.store.save(&self.credentials) {
                        warn!("Failed to persist invalidated refresh token: {}", e);
                    }
                    self.state = TokenState::Invalid;
                    RefreshError::InvalidGrant
                } else if parsed.error_description.to_lowercase().contains("expired") {
                    self.state = TokenState::Invalid;
                    RefreshError::ExpiredRefreshToken
                } else {
                    self.state = TokenState::Stale;
                    RefreshError::Unknown {
                        status,
                        body: body.to_string(),
                    }
                }
            }
            401 => {
                self.state = TokenState::Invalid;
                RefreshError::UnauthorizedClient
            }
            403 => {
                self.state = TokenState::Invalid;
                RefreshError::CsrfRejected
            }
            s if s >= 500 => {
                self.state = TokenState::Stale;
                RefreshError::ProviderServerError(s)
            }
            _ => {
                self.state = TokenState::Stale;
                RefreshError::Unknown {
                    status,
                    body: body.to_string(),
                }
            }
        }
    }

    /// Whether the operator must re-run the out-of-band authorization flow.
    ///
    /// Not read-only: a stale-looking token triggers a live refresh probe
    /// that may rotate and persist credentials as a side effect.
    pub async fn requires_manual_reauth(&mut self) -> bool {
        if self.credentials.refresh_token_invalidated() {
            return true;
        }
        if self.is_stale() {
            match self.refresh().await {
                Ok(()) => false,
                Err(e) => {
                    warn!("Refresh probe failed: {}", e);
                    true
                }
            }
        } else {
            false
        }
    }

    /// Human runbook for the manual reauthorization case.
    pub fn reauth_instructions(&self) -> String {
        let client_id = self.credentials.client_id.as_deref().unwrap_or("<missing>");
        format!(
            "Manual reauthorization required:\n\
             \x20 1. Open the Intuit Developer Console (https://developer.intuit.com) and sign in.\n\
             \x20 2. Select the app for client id {} in the {} environment.\n\
             \x20 3. Run the OAuth2 playground to complete the authorization-code exchange\n\
             \x20    and obtain a new access token and refresh token.\n\
             \x20 4. Update INTUIT_ACCESS_TOKEN and INTUIT_REFRESH_TOKEN in {}.\n\
             \x20 5. Set TOKEN_TIMESTAMP to the current time (ISO-8601, e.g. {}).",
            client_id,
            self.config.environment,
            self.store.path().display(),
            current_timestamp()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn minutes_ago(minutes: i64) -> String {
        (Local::now().naive_local() - chrono::Duration::minutes(minutes))
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }

    #[test]
    fn test_is_expired_missing_timestamp() {
        assert!(is_expired(None, Local::now().naive_local()));
    }

    #[test]
    fn test_is_expired_unparsable_timestamp() {
        assert!(is_expired(Some("not-a-date"), Local::now().naive_local()));
        assert!(is_expired(Some(""), Local::now().naive_local()));
    }

    #[test]
    fn test_is_expired_boundaries() {
        let now = Local::now().naive_local();
        assert!(!is_expired(Some(&minutes_ago(0)), now));
        assert!(!is_expired(Some(&minutes_ago(10)), now));
        assert!(!is_expired(Some(&minutes_ago(54)), now));
        assert!(is_expired(Some(&minutes_ago(56)), now));
        assert!(is_expired(Some(&minutes_ago(120)), now));
    }

    #[test]
    fn test_is_expired_accepts_timestamps_without_fraction() {
        // The forced-stale sentinel has no fractional seconds.
        assert!(is_expired(Some("2020-01-01T00:00:00"), Local::now().naive_local()));
    }

    #[test]
    fn test_current_timestamp_round_trips() {
        let stamp = current_timestamp();
        assert!(NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).is_ok());
        assert!(!is_expired(Some(&stamp), Local::now().naive_local()));
    }

    fn manager_with(contents: &str) -> (tempfile::TempDir, AuthManager) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.config");
        std::fs::write(&path, contents).unwrap();
        let store = CredentialStore::new(path);
        // Unroutable endpoints: these tests must never hit the network.
        let config = ApiConfig::with_overrides(
            Environment::Sandbox,
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:1/tokens".to_string(),
        );
        let manager = AuthManager::new(store, config).unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn test_refresh_missing_credentials_is_fatal() {
        let (_dir, mut manager) = manager_with("INTUIT_REFRESH_TOKEN=ref\n");
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, RefreshError::MissingCredentials));
        assert!(!err.is_transient());
        assert_eq!(manager.state(), TokenState::Invalid);
    }

    #[tokio::test]
    async fn test_sentinel_short_circuits_without_network() {
        let (_dir, mut manager) = manager_with(
            "INTUIT_CLIENT_ID=id\nINTUIT_CLIENT_SECRET=secret\nINTUIT_REFRESH_TOKEN=EXPIRED\n",
        );
        assert_eq!(manager.state(), TokenState::Invalid);
        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, RefreshError::InvalidGrant));
        assert!(manager.requires_manual_reauth().await);
    }

    #[test]
    fn test_initial_state_fresh_vs_stale() {
        let fresh = format!(
            "INTUIT_CLIENT_ID=id\nINTUIT_CLIENT_SECRET=s\nINTUIT_ACCESS_TOKEN=t\nINTUIT_REFRESH_TOKEN=r\nINTUIT_REALM_ID=1\nTOKEN_TIMESTAMP={}\n",
            minutes_ago(10)
        );
        let (_dir, manager) = manager_with(&fresh);
        assert_eq!(manager.state(), TokenState::Fresh);

        let stale = format!(
            "INTUIT_CLIENT_ID=id\nINTUIT_CLIENT_SECRET=s\nINTUIT_ACCESS_TOKEN=t\nINTUIT_REFRESH_TOKEN=r\nINTUIT_REALM_ID=1\nTOKEN_TIMESTAMP={}\n",
            minutes_ago(90)
        );
        let (_dir2, manager) = manager_with(&stale);
        assert_eq!(manager.state(), TokenState::Stale);
    }

    #[test]
    fn test_force_stale_rewrites_timestamp() {
        let contents = format!(
            "INTUIT_CLIENT_ID=id\nINTUIT_CLIENT_SECRET=s\nINTUIT_ACCESS_TOKEN=t\nINTUIT_REFRESH_TOKEN=r\nINTUIT_REALM_ID=1\nTOKEN_TIMESTAMP={}\n",
            minutes_ago(1)
        );
        let (_dir, mut manager) = manager_with(&contents);
        assert!(!manager.is_stale());
        manager.force_stale();
        assert!(manager.is_stale());
        assert_eq!(manager.state(), TokenState::Stale);
    }

    #[test]
    fn test_reauth_instructions_mention_runbook_details() {
        let (_dir, manager) = manager_with("INTUIT_CLIENT_ID=my-client-id\nINTUIT_REFRESH_TOKEN=r\n");
        let runbook = manager.reauth_instructions();
        assert!(runbook.contains("Intuit Developer Console"));
        assert!(runbook.contains("my-client-id"));
        assert!(runbook.contains("sandbox"));
        assert!(runbook.contains("TOKEN_TIMESTAMP"));
    }
}
