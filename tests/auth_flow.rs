//! End-to-end token lifecycle tests against a mock provider: refresh and
//! rotation, the invalid_grant sentinel, the mid-call 401 retry, the 403
//! no-retry rule, and bounded 5xx retries.

use chrono::Local;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{basic_auth, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qb_billing_cli::api::{
    AuthManager, ErrorCategory, QuickBooksClient, RefreshError, RequestOptions, TokenState,
};
use qb_billing_cli::auth::{CredentialStore, EXPIRED_SENTINEL};
use qb_billing_cli::config::{ApiConfig, Environment};

const REALM: &str = "9999";
const TOKEN_PATH: &str = "/oauth2/v1/tokens/bearer";

fn timestamp_minutes_ago(minutes: i64) -> String {
    (Local::now().naive_local() - chrono::Duration::minutes(minutes))
        .format("%Y-%m-%dT%H:%M:%S%.f")
        .to_string()
}

/// Credentials file in a tempdir, with the access token `age_minutes` old.
fn seeded_store(dir: &TempDir, age_minutes: i64) -> CredentialStore {
    let contents = format!(
        "INTUIT_CLIENT_ID=client-abc\n\
         INTUIT_CLIENT_SECRET=secret-xyz\n\
         INTUIT_ACCESS_TOKEN=old-access\n\
         INTUIT_REFRESH_TOKEN=old-refresh\n\
         INTUIT_REALM_ID={}\n\
         TOKEN_TIMESTAMP={}\n\
         NOTION_TOKEN=notion-secret\n",
        REALM,
        timestamp_minutes_ago(age_minutes)
    );
    let path = dir.path().join("credentials.config");
    std::fs::write(&path, contents).unwrap();
    CredentialStore::new(path)
}

fn test_config(server: &MockServer) -> ApiConfig {
    ApiConfig::with_overrides(
        Environment::Sandbox,
        server.uri(),
        format!("{}{}", server.uri(), TOKEN_PATH),
    )
}

async fn mount_token_success(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(basic_auth("client-abc", "secret-xyz"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn stale_token_refresh_rotates_and_persists_both_tokens() {
    let server = MockServer::start().await;
    mount_token_success(&server, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 120);
    let mut auth = AuthManager::new(store.clone(), test_config(&server)).unwrap();
    assert_eq!(auth.state(), TokenState::Stale);

    auth.ensure_fresh().await.unwrap();
    assert_eq!(auth.state(), TokenState::Fresh);
    assert_eq!(auth.access_token(), Some("new-access"));

    // Rotation hit disk before ensure_fresh returned.
    let reloaded = store.load().unwrap();
    assert_eq!(reloaded.access_token.as_deref(), Some("new-access"));
    assert_eq!(reloaded.refresh_token.as_deref(), Some("new-refresh"));
    assert!(!qb_billing_cli::api::auth::is_expired(
        reloaded.token_timestamp.as_deref(),
        Local::now().naive_local()
    ));
    // Unrelated keys survive the rewrite.
    assert_eq!(reloaded.get("NOTION_TOKEN", ""), "notion-secret");
}

#[tokio::test]
async fn fresh_token_skips_the_token_endpoint() {
    let server = MockServer::start().await;
    mount_token_success(&server, 0).await;
    Mock::given(method("GET"))
        .and(path(format!("/v3/company/{}/companyinfo/{}", REALM, REALM)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CompanyInfo": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 10);
    let auth = AuthManager::new(store, test_config(&server)).unwrap();
    let mut client = QuickBooksClient::new(auth);

    client.validate_connection().await.unwrap();
}

#[tokio::test]
async fn caller_headers_override_defaults_without_duplicates() {
    let server = MockServer::start().await;
    mount_token_success(&server, 0).await;
    let company_path = format!("/v3/company/{}/companyinfo/{}", REALM, REALM);
    Mock::given(method("GET"))
        .and(path(company_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CompanyInfo": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 10);
    let auth = AuthManager::new(store, test_config(&server)).unwrap();
    let mut client = QuickBooksClient::new(auth);

    let url = format!("{}{}", server.uri(), company_path);
    let options = RequestOptions::default()
        .header("Accept", "application/vnd.intuit+json")
        .header("Authorization", "Bearer smuggled-token");
    let response = client
        .execute(reqwest::Method::GET, &url, options)
        .await
        .unwrap();
    assert!(response.status().is_success());

    let requests = server.received_requests().await.unwrap();
    // A caller-supplied Accept replaces the default, it is not appended.
    let accepts: Vec<_> = requests[0].headers.get_all("accept").iter().collect();
    assert_eq!(accepts.len(), 1);
    assert_eq!(accepts[0].to_str().unwrap(), "application/vnd.intuit+json");
    // The bearer token always comes from the credential store.
    assert_eq!(
        requests[0].headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer old-access"
    );
}

#[tokio::test]
async fn invalid_grant_writes_sentinel_and_sticks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token invalid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 120);
    let mut auth = AuthManager::new(store.clone(), test_config(&server)).unwrap();

    let err = auth.refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::InvalidGrant));
    assert!(!err.is_transient());
    assert_eq!(auth.state(), TokenState::Invalid);

    // Sentinel persisted so later runs fail fast.
    let reloaded = store.load().unwrap();
    assert_eq!(reloaded.refresh_token.as_deref(), Some(EXPIRED_SENTINEL));

    // Sticky: the probe answers from the sentinel without another network
    // call (the expect(1) above verifies on drop).
    assert!(auth.requires_manual_reauth().await);
    let err = auth.refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::InvalidGrant));
}

#[tokio::test]
async fn mid_call_401_forces_one_refresh_and_retry() {
    let server = MockServer::start().await;
    mount_token_success(&server, 1).await;

    let company_path = format!("/v3/company/{}/companyinfo/{}", REALM, REALM);
    // First call rejects the cached token, the retry with the rotated token
    // succeeds.
    Mock::given(method("GET"))
        .and(path(company_path.clone()))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(company_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"CompanyInfo": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 10);
    let auth = AuthManager::new(store.clone(), test_config(&server)).unwrap();
    let mut client = QuickBooksClient::new(auth);

    client.validate_connection().await.unwrap();
    assert_eq!(store.load().unwrap().access_token.as_deref(), Some("new-access"));
}

#[tokio::test]
async fn forbidden_is_never_retried() {
    let server = MockServer::start().await;
    mount_token_success(&server, 0).await;
    Mock::given(method("GET"))
        .and(path(format!("/v3/company/{}/companyinfo/{}", REALM, REALM)))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "Fault": {"Error": [{"Message": "Forbidden", "Detail": "Insufficient scope"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 10);
    let auth = AuthManager::new(store, test_config(&server)).unwrap();
    let mut client = QuickBooksClient::new(auth);

    client.validate_connection().await.unwrap_err();
    let summary = client.error_summary();
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.error_categories.get(&ErrorCategory::AuthError), Some(&1));
}

#[tokio::test]
async fn server_errors_retry_with_bounded_attempts() {
    let server = MockServer::start().await;
    mount_token_success(&server, 0).await;
    Mock::given(method("GET"))
        .and(path(format!("/v3/company/{}/companyinfo/{}", REALM, REALM)))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 10);
    let auth = AuthManager::new(store, test_config(&server)).unwrap();
    let mut client = QuickBooksClient::new(auth);

    client.validate_connection().await.unwrap_err();
    let summary = client.error_summary();
    assert_eq!(summary.error_categories.get(&ErrorCategory::ServerError), Some(&1));
}

#[tokio::test]
async fn rate_limit_is_classified_not_retried() {
    let server = MockServer::start().await;
    mount_token_success(&server, 0).await;
    Mock::given(method("GET"))
        .and(path(format!("/v3/company/{}/companyinfo/{}", REALM, REALM)))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "120")
                .insert_header("intuit_tid", "tid-123"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 10);
    let auth = AuthManager::new(store, test_config(&server)).unwrap();
    let mut client = QuickBooksClient::new(auth);

    client.validate_connection().await.unwrap_err();
    let summary = client.error_summary();
    assert_eq!(summary.error_categories.get(&ErrorCategory::RateLimit), Some(&1));
    assert_eq!(summary.intuit_tids, vec!["tid-123".to_string()]);

    let entry = &client.errors().entries()[0];
    assert_eq!(entry.retry_after_seconds, Some(120));
    assert!(entry.retry_recommended);
}

#[tokio::test]
async fn provider_5xx_during_refresh_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, 120);
    let mut auth = AuthManager::new(store.clone(), test_config(&server)).unwrap();

    let err = auth.refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::ProviderServerError(502)));
    assert!(err.is_transient());
    assert_eq!(auth.state(), TokenState::Stale);
    // Refresh token untouched; a later attempt may still succeed.
    assert_eq!(store.load().unwrap().refresh_token.as_deref(), Some("old-refresh"));
}
