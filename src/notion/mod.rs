use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::{Value, json};

use crate::auth::credentials::CredentialSet;
use crate::billing::{ClientConfig, ClientHours, TimeEntry};

const NOTION_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

const NOTION_TOKEN_KEY: &str = "NOTION_TOKEN";
const COMPANIES_DB_KEY: &str = "NOTION_COMPANIES_DB";
const CLIENT_HOURS_DB_KEY: &str = "NOTION_CLIENT_HOURS_DB";

/// Thin collaborator client for the Notion workspace holding client
/// configuration and time tracking. Plain bearer auth; none of the token
/// lifecycle machinery the QuickBooks side needs.
pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    companies_db: String,
    hours_db: String,
}

impl NotionClient {
    pub fn from_credentials(credentials: &CredentialSet) -> Result<Self> {
        let token = require_key(credentials, NOTION_TOKEN_KEY)?;
        let companies_db = require_key(credentials, COMPANIES_DB_KEY)?;
        let hours_db = require_key(credentials, CLIENT_HOURS_DB_KEY)?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("qb-billing-cli/1.0")
            .build()?;

        Ok(Self {
            http,
            base_url: NOTION_API_BASE.to_string(),
            token,
            companies_db,
            hours_db,
        })
    }

    async fn query_database(&self, database_id: &str, filter: Value) -> Result<Value> {
        let url = format!("{}/databases/{}/query", self.base_url, database_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&json!({ "filter": filter }))
            .send()
            .await
            .context("Notion database query failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Notion query returned {}: {}", status, body);
        }
        response.json().await.context("Failed to parse Notion response")
    }

    /// Active clients from the companies database, with their billing
    /// configuration.
    pub async fn fetch_active_clients(&self) -> Result<Vec<ClientConfig>> {
        let filter = json!({
            "property": "Client Status",
            "status": { "equals": "Active" }
        });
        let data = self.query_database(&self.companies_db, filter).await?;

        let mut clients = Vec::new();
        for result in data["results"].as_array().unwrap_or(&Vec::new()) {
            match parse_client_page(result) {
                Some(client) => {
                    debug!(
                        "Client {}: {} hrs retainer, ${}/hr overage",
                        client.name, client.monthly_retainer_hours, client.overage_rate
                    );
                    clients.push(client);
                }
                None => warn!("Skipping client page with missing Name property"),
            }
        }
        Ok(clients)
    }

    /// Time entries in `[start, end]`, rolled up per client. Entries whose
    /// client cannot be determined are skipped with a warning.
    pub async fn fetch_time_totals(&self, start: &str, end: &str) -> Result<HashMap<String, ClientHours>> {
        let filter = json!({
            "and": [
                { "property": "Date", "date": { "on_or_after": start } },
                { "property": "Date", "date": { "on_or_before": end } }
            ]
        });
        let data = self.query_database(&self.hours_db, filter).await?;

        let mut totals: HashMap<String, ClientHours> = HashMap::new();
        for result in data["results"].as_array().unwrap_or(&Vec::new()) {
            let entry = parse_time_entry(result);

            let client_name = if let Some(page_id) = &entry.client_page_id {
                self.resolve_client_name(page_id).await
            } else {
                extract_client_from_title(&entry.title)
            };

            let Some(client_name) = client_name else {
                warn!("Could not determine client for time entry: {}", entry.title);
                continue;
            };

            totals.entry(client_name).or_default().push(TimeEntry {
                date: entry.date,
                hours: entry.hours,
                description: entry.description,
            });
        }
        Ok(totals)
    }

    /// Resolve a client page relation to the page's Name title.
    async fn resolve_client_name(&self, page_id: &str) -> Option<String> {
        let url = format!("{}/pages/{}", self.base_url, page_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            warn!("Could not resolve client page {}", page_id);
            return None;
        }
        let page: Value = response.json().await.ok()?;
        title_text(&page["properties"]["Name"])
    }
}

fn require_key(credentials: &CredentialSet, key: &str) -> Result<String> {
    let value = credentials.get(key, "");
    if value.is_empty() {
        anyhow::bail!("{} not found in credentials file", key);
    }
    Ok(value.to_string())
}

fn title_text(property: &Value) -> Option<String> {
    property["title"][0]["plain_text"].as_str().map(|s| s.to_string())
}

fn rich_text(property: &Value) -> String {
    property["rich_text"][0]["plain_text"].as_str().unwrap_or("").to_string()
}

fn number(property: &Value) -> f64 {
    property["number"].as_f64().unwrap_or(0.0)
}

/// Billing configuration out of one companies-database page.
pub fn parse_client_page(page: &Value) -> Option<ClientConfig> {
    let properties = &page["properties"];
    let name = title_text(&properties["Name"])?;

    let retainer_service_ids: Vec<String> = properties["Retainer Service IDs"]["multi_select"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str())
                .filter(|id| !id.is_empty())
                .map(|id| id.to_string())
                .collect()
        })
        .unwrap_or_default();

    Some(ClientConfig {
        name,
        page_url: page["url"].as_str().unwrap_or("").to_string(),
        qb_customer_id: rich_text(&properties["QB Customer ID"]),
        monthly_retainer_hours: number(&properties["Monthly Retainer Hours"]),
        retainer_rate: number(&properties["Retainer Rate"]),
        overage_rate: number(&properties["Overage Rate"]),
        overage_sku: rich_text(&properties["Overage SKU"]),
        retainer_service_ids,
    })
}

struct RawTimeEntry {
    date: String,
    hours: f64,
    description: String,
    title: String,
    client_page_id: Option<String>,
}

fn parse_time_entry(result: &Value) -> RawTimeEntry {
    let properties = &result["properties"];
    RawTimeEntry {
        date: properties["Date"]["date"]["start"].as_str().unwrap_or("").to_string(),
        hours: number(&properties["Hours"]),
        description: rich_text(&properties["Description"]),
        title: title_text(&properties["Title"]).unwrap_or_default(),
        client_page_id: properties["Client"]["relation"][0]["id"].as_str().map(|s| s.to_string()),
    }
}

/// Fallback client attribution from titles like "work for ABA". The keyword
/// search is ASCII case-insensitive over the original bytes; the matched
/// window is pure ASCII, so the slice offset always lands on a char boundary
/// even when the title contains multibyte characters.
pub fn extract_client_from_title(title: &str) -> Option<String> {
    const NEEDLE: &[u8] = b"for ";
    let start = title
        .as_bytes()
        .windows(NEEDLE.len())
        .position(|window| window.eq_ignore_ascii_case(NEEDLE))?;
    let client = title[start + NEEDLE.len()..].trim();
    if client.is_empty() {
        None
    } else {
        Some(client.to_string())
    }
}
