use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Method;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use thiserror::Error;

use super::auth::{AuthManager, RefreshError};
use super::error::{self, ErrorDescriptor, ErrorLog, ErrorSummary, INTUIT_TID_HEADER};
use super::models::{Customer, InvoicePayload, InvoiceSummary, Item, query_entities};
use super::telemetry::{LogSink, RequestAttempt, TelemetrySink, redact_headers};

/// Retry budget for one logical call: 2 retries, 3 attempts total.
const MAX_RETRIES: u32 = 2;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Execution-scoped failures. HTTP-level errors (401/403/429/5xx responses)
/// are not represented here; the executor hands those responses back to the
/// caller for classification.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("token refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("request failed after {attempts} attempts: {message}")]
    ExhaustedRetries { attempts: u32, message: String },
    #[error("no response from QuickBooks after {attempts} attempts")]
    NoResponse { attempts: u32 },
}

/// Caller-supplied knobs for one request. Caller headers win over the
/// executor's defaults for everything except the Authorization header.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self {
            json: Some(body),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Authenticated QuickBooks client: wraps every call with the freshness
/// check, forced-refresh 401 retry, bounded backoff for 5xx and network
/// failures, and error classification for the caller.
pub struct QuickBooksClient {
    http: reqwest::Client,
    auth: AuthManager,
    telemetry: Box<dyn TelemetrySink>,
    errors: ErrorLog,
}

impl QuickBooksClient {
    pub fn new(auth: AuthManager) -> Self {
        Self::with_telemetry(auth, Box::new(LogSink))
    }

    pub fn with_telemetry(auth: AuthManager, telemetry: Box<dyn TelemetrySink>) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("qb-billing-cli/1.0")
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            auth,
            telemetry,
            errors: ErrorLog::default(),
        }
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut AuthManager {
        &mut self.auth
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn error_summary(&self) -> ErrorSummary {
        self.errors.summary()
    }

    /// Execute one authenticated call with the full retry policy.
    ///
    /// Returns the final HTTP response whatever its status; only refresh
    /// failures and connection-level exhaustion surface as `RequestError`.
    /// A mid-call 401 forces exactly one refresh-and-retry cycle; 403 is
    /// never retried; 5xx retries with exponential backoff (1s, 2s); 429
    /// and 400 are returned for classification, not retried.
    pub async fn execute(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Response, RequestError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();

        for attempt in 0..=MAX_RETRIES {
            // A refresh failure aborts the whole call; the caller decides
            // whether to invoke execute again later.
            self.auth.ensure_fresh().await?;

            let token = self.auth.access_token().unwrap_or_default().to_string();
            let timeout = options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

            // Defaults first, caller headers inserted over them so a caller
            // wins the conflict instead of sending a duplicate header. The
            // Authorization header is never caller-controlled.
            let mut headers = HeaderMap::new();
            headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
            for (name, value) in &options.headers {
                if name.eq_ignore_ascii_case("authorization") {
                    continue;
                }
                match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => warn!("Dropping malformed request header '{}'", name),
                }
            }

            let mut logged_headers: Vec<(String, String)> = headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
                .collect();
            logged_headers.push(("Authorization".to_string(), format!("Bearer {}", token)));

            let mut request = self
                .http
                .request(method.clone(), url)
                .headers(headers)
                .bearer_auth(&token)
                .timeout(timeout);
            if let Some(body) = &options.json {
                request = request.json(body);
            }

            self.telemetry.record_request(&RequestAttempt {
                correlation_id: correlation_id.clone(),
                method: method.to_string(),
                url: url.to_string(),
                headers: redact_headers(&logged_headers),
                attempt: attempt + 1,
            });

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let intuit_tid = response
                        .headers()
                        .get(INTUIT_TID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.to_string());
                    self.telemetry
                        .record_response(&correlation_id, status, url, intuit_tid.as_deref());

                    match status {
                        401 if attempt < MAX_RETRIES => {
                            // The provider no longer accepts a token we still
                            // consider fresh; force the next iteration through
                            // the refresh protocol.
                            debug!("Got 401, forcing token refresh (attempt {})", attempt + 1);
                            self.auth.force_stale();
                            continue;
                        }
                        403 => return Ok(response),
                        s if s >= 500 && attempt < MAX_RETRIES => {
                            let delay = Duration::from_secs(1u64 << attempt);
                            warn!(
                                "Server error {} on attempt {}, retrying in {:?}",
                                s,
                                attempt + 1,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        _ => return Ok(response),
                    }
                }
                Err(e) => {
                    warn!("Request error on attempt {}: {}", attempt + 1, e);
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(NETWORK_RETRY_DELAY).await;
                        continue;
                    }
                    return Err(RequestError::ExhaustedRetries {
                        attempts: attempt + 1,
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(RequestError::NoResponse {
            attempts: MAX_RETRIES + 1,
        })
    }

    /// Read the failure out of a non-success response, classify it, record
    /// it in the session error log, and emit it through the telemetry sink.
    pub async fn classify_failure(&mut self, response: reqwest::Response) -> ErrorDescriptor {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let descriptor = error::classify(status, &url, &headers, &body);
        self.telemetry.record_error(&descriptor);
        self.errors.record(descriptor.clone());
        descriptor
    }

    async fn request_json(&mut self, method: Method, url: &str, options: RequestOptions) -> Result<Value> {
        let response = self.execute(method, url, options).await?;
        if response.status().is_success() {
            response
                .json()
                .await
                .context("Failed to parse QuickBooks response body")
        } else {
            let descriptor = self.classify_failure(response).await;
            anyhow::bail!("{} ({})", descriptor.user_message, descriptor.message)
        }
    }

    async fn get_json(&mut self, url: &str) -> Result<Value> {
        self.request_json(Method::GET, url, RequestOptions::default()).await
    }

    fn company_url(&self, path: &str) -> Result<String> {
        let realm_id = self.auth.realm_id()?;
        Ok(self.auth.config().company_endpoint(realm_id, path))
    }

    /// Run a QuickBooks SQL-ish query (`SELECT * FROM Customer`).
    pub async fn query(&mut self, statement: &str) -> Result<Value> {
        let path = format!("query?query={}", urlencoding::encode(statement));
        let url = self.company_url(&path)?;
        self.get_json(&url).await
    }

    pub async fn fetch_customers(&mut self) -> Result<Vec<Customer>> {
        let response = self.query("SELECT * FROM Customer").await?;
        Ok(query_entities(&response, "Customer"))
    }

    pub async fn fetch_active_items(&mut self) -> Result<Vec<Item>> {
        let response = self.query("SELECT * FROM Item WHERE Active = true").await?;
        Ok(query_entities(&response, "Item"))
    }

    /// Listed unit price of one service item. Missing price is an error the
    /// caller surfaces; it is never silently defaulted.
    pub async fn item_unit_price(&mut self, item_id: &str) -> Result<f64> {
        let url = self.company_url(&format!("item/{}", item_id))?;
        let response = self.get_json(&url).await?;
        response["Item"]["UnitPrice"]
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("Item {} has no listed unit price", item_id))
    }

    /// Create a draft invoice and return its id and document number.
    pub async fn create_invoice(&mut self, payload: &InvoicePayload) -> Result<InvoiceSummary> {
        let url = self.company_url("invoice")?;
        let body = serde_json::to_value(payload)?;
        let response = self
            .request_json(Method::POST, &url, RequestOptions::json(body))
            .await?;

        let invoice = &response["Invoice"];
        let id = invoice["Id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invoice response missing Id"))?
            .to_string();
        let doc_number = invoice["DocNumber"].as_str().unwrap_or_default().to_string();
        Ok(InvoiceSummary {
            id,
            doc_number,
            total_amount: payload.total_amount(),
        })
    }

    /// Probe the connection with a company-info read through the full
    /// executor path.
    pub async fn validate_connection(&mut self) -> Result<()> {
        let realm_id = self.auth.realm_id()?.to_string();
        let url = self.company_url(&format!("companyinfo/{}", realm_id))?;
        let response = self.execute(Method::GET, &url, RequestOptions::default()).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let descriptor = self.classify_failure(response).await;
            anyhow::bail!("QuickBooks connection failed: {}", descriptor.message)
        }
    }
}
