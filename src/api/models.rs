use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Successful token-endpoint response. The provider rotates the refresh token
/// on every refresh, so both fields are always present together.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Token-endpoint error body (`{"error": "...", "error_description": "..."}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "DisplayName", alias = "Name")]
    pub name: String,
    #[serde(rename = "CompanyName", default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(rename = "Active", default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "UnitPrice", default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(rename = "Active", default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemRef {
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SalesItemLineDetail {
    #[serde(rename = "ItemRef")]
    pub item_ref: ItemRef,
    #[serde(rename = "Qty")]
    pub qty: f64,
    #[serde(rename = "UnitPrice")]
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    #[serde(rename = "DetailType")]
    pub detail_type: String,
    #[serde(rename = "Amount")]
    pub amount: f64,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "SalesItemLineDetail")]
    pub sales_item_line_detail: SalesItemLineDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerMemo {
    pub value: String,
}

/// Draft invoice payload as the `POST /invoice` endpoint expects it.
#[derive(Debug, Clone, Serialize)]
pub struct InvoicePayload {
    #[serde(rename = "CustomerRef")]
    pub customer_ref: ItemRef,
    #[serde(rename = "TxnDate")]
    pub txn_date: String,
    #[serde(rename = "DueDate")]
    pub due_date: String,
    #[serde(rename = "Line")]
    pub line: Vec<InvoiceLine>,
    #[serde(rename = "CustomerMemo", skip_serializing_if = "Option::is_none")]
    pub customer_memo: Option<CustomerMemo>,
}

impl InvoicePayload {
    pub fn total_amount(&self) -> f64 {
        self.line.iter().map(|l| l.amount).sum()
    }
}

/// The interesting subset of a created invoice.
#[derive(Debug, Clone)]
pub struct InvoiceSummary {
    pub id: String,
    pub doc_number: String,
    pub total_amount: f64,
}

/// Pull an entity array out of a `{"QueryResponse": {"<Entity>": [...]}}`
/// envelope. Missing entity key means an empty result set, not an error.
pub fn query_entities<T: serde::de::DeserializeOwned>(response: &Value, entity: &str) -> Vec<T> {
    response["QueryResponse"][entity]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
