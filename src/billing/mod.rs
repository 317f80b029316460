use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::api::models::{CustomerMemo, InvoiceLine, InvoicePayload, ItemRef, SalesItemLineDetail};

const DETAIL_TYPE: &str = "SalesItemLineDetail";
const PAYMENT_MEMO: &str = "Payment accepted via ACH or Wire. Contact billing@mellonhead.co for account and routing numbers.";
const PAYMENT_TERMS_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum BillingError {
    /// A service item's listed price could not be fetched. Surfaced to the
    /// caller instead of guessing a default amount.
    #[error("price lookup failed for service item {item_id}: {reason}")]
    PriceLookupFailed { item_id: String, reason: String },
    #[error("client '{client}' has no QuickBooks customer id configured")]
    MissingCustomerId { client: String },
}

/// Billing configuration for one client, as maintained in the Notion
/// companies database.
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    pub name: String,
    pub page_url: String,
    pub qb_customer_id: String,
    pub monthly_retainer_hours: f64,
    pub retainer_rate: f64,
    pub overage_rate: f64,
    pub overage_sku: String,
    pub retainer_service_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeEntry {
    pub date: String,
    pub hours: f64,
    pub description: String,
}

/// Rolled-up time tracking for one client over the overage window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientHours {
    pub entries: Vec<TimeEntry>,
    pub total_hours: f64,
}

impl ClientHours {
    pub fn push(&mut self, entry: TimeEntry) {
        self.total_hours += entry.hours;
        self.entries.push(entry);
    }
}

/// Retainer-vs-overage arithmetic for one client and one window.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingBreakdown {
    pub actual_hours: f64,
    pub overage_hours: f64,
    pub overage_amount: f64,
    pub under_retainer_hours: f64,
}

impl BillingBreakdown {
    pub fn compute(config: &ClientConfig, actual_hours: f64) -> Self {
        let overage_hours = (actual_hours - config.monthly_retainer_hours).max(0.0);
        Self {
            actual_hours,
            overage_hours,
            overage_amount: overage_hours * config.overage_rate,
            under_retainer_hours: (config.monthly_retainer_hours - actual_hours).max(0.0),
        }
    }

    pub fn has_overage(&self) -> bool {
        self.overage_hours > 0.0
    }
}

/// `2025-11` -> `November 2025`.
pub fn format_billing_month(month: &str) -> Result<String> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid billing month '{}' (expected YYYY-MM)", month))?;
    Ok(date.format("%B %Y").to_string())
}

pub fn due_date(invoice_date: NaiveDate) -> NaiveDate {
    invoice_date + Duration::days(PAYMENT_TERMS_DAYS)
}

fn line(item_id: &str, qty: f64, unit_price: f64, amount: f64, description: String) -> InvoiceLine {
    InvoiceLine {
        detail_type: DETAIL_TYPE.to_string(),
        amount,
        description,
        sales_item_line_detail: SalesItemLineDetail {
            item_ref: ItemRef {
                value: item_id.to_string(),
            },
            qty,
            unit_price,
        },
    }
}

/// One consolidated draft invoice for a client: one line per retainer service
/// at its QuickBooks-listed price, plus an overage line when the client went
/// past the retainer allocation.
///
/// `service_prices` must carry a price for every retainer service id; a
/// missing entry fails the invoice rather than billing a made-up amount.
pub fn build_client_invoice(
    config: &ClientConfig,
    breakdown: &BillingBreakdown,
    service_prices: &HashMap<String, f64>,
    bill_month: &str,
    overage_month: &str,
    invoice_date: NaiveDate,
) -> Result<InvoicePayload, BillingError> {
    if config.qb_customer_id.trim().is_empty() {
        return Err(BillingError::MissingCustomerId {
            client: config.name.clone(),
        });
    }

    let bill_period = format_billing_month(bill_month).unwrap_or_else(|_| bill_month.to_string());

    let mut lines = Vec::new();
    for service_id in &config.retainer_service_ids {
        let price = service_prices
            .get(service_id)
            .copied()
            .ok_or_else(|| BillingError::PriceLookupFailed {
                item_id: service_id.clone(),
                reason: "no price available".to_string(),
            })?;
        lines.push(line(
            service_id,
            1.0,
            price,
            price,
            format!("Services for {}", bill_period),
        ));
    }

    if breakdown.has_overage() {
        let overage_period = format_billing_month(overage_month).unwrap_or_else(|_| overage_month.to_string());
        lines.push(line(
            &config.overage_sku,
            breakdown.overage_hours,
            config.overage_rate,
            breakdown.overage_amount,
            format!(
                "Services for {} ({} hrs overage)",
                overage_period, breakdown.overage_hours
            ),
        ));
    }

    Ok(InvoicePayload {
        customer_ref: ItemRef {
            value: config.qb_customer_id.clone(),
        },
        txn_date: invoice_date.format("%Y-%m-%d").to_string(),
        due_date: due_date(invoice_date).format("%Y-%m-%d").to_string(),
        line: lines,
        customer_memo: Some(CustomerMemo {
            value: PAYMENT_MEMO.to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ClientConfig {
        ClientConfig {
            name: "ABA".to_string(),
            page_url: "https://notion.so/aba".to_string(),
            qb_customer_id: "59".to_string(),
            monthly_retainer_hours: 20.0,
            retainer_rate: 3000.0,
            overage_rate: 175.0,
            overage_sku: "24".to_string(),
            retainer_service_ids: vec!["7".to_string(), "8".to_string()],
        }
    }

    #[test]
    fn test_breakdown_overage() {
        let b = BillingBreakdown::compute(&sample_config(), 26.5);
        assert_eq!(b.overage_hours, 6.5);
        assert_eq!(b.overage_amount, 6.5 * 175.0);
        assert_eq!(b.under_retainer_hours, 0.0);
        assert!(b.has_overage());
    }

    #[test]
    fn test_breakdown_under_retainer() {
        let b = BillingBreakdown::compute(&sample_config(), 12.0);
        assert_eq!(b.overage_hours, 0.0);
        assert_eq!(b.overage_amount, 0.0);
        assert_eq!(b.under_retainer_hours, 8.0);
        assert!(!b.has_overage());
    }

    #[test]
    fn test_breakdown_exact_match() {
        let b = BillingBreakdown::compute(&sample_config(), 20.0);
        assert_eq!(b.overage_hours, 0.0);
        assert_eq!(b.under_retainer_hours, 0.0);
    }

    #[test]
    fn test_format_billing_month() {
        assert_eq!(format_billing_month("2025-11").unwrap(), "November 2025");
        assert!(format_billing_month("november").is_err());
    }

    #[test]
    fn test_due_date_is_net_30() {
        let invoice_date = NaiveDate::from_ymd_opt(2025, 11, 9).unwrap();
        assert_eq!(due_date(invoice_date), NaiveDate::from_ymd_opt(2025, 12, 9).unwrap());
    }

    #[test]
    fn test_build_invoice_with_overage() {
        let config = sample_config();
        let breakdown = BillingBreakdown::compute(&config, 26.0);
        let prices = HashMap::from([("7".to_string(), 1500.0), ("8".to_string(), 1500.0)]);
        let invoice_date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();

        let payload =
            build_client_invoice(&config, &breakdown, &prices, "2025-12", "2025-11", invoice_date).unwrap();

        assert_eq!(payload.customer_ref.value, "59");
        assert_eq!(payload.line.len(), 3);
        assert_eq!(payload.line[0].description, "Services for December 2025");
        assert_eq!(payload.line[0].amount, 1500.0);
        let overage = &payload.line[2];
        assert_eq!(overage.sales_item_line_detail.item_ref.value, "24");
        assert_eq!(overage.sales_item_line_detail.qty, 6.0);
        assert_eq!(overage.amount, 6.0 * 175.0);
        assert!(overage.description.contains("November 2025"));
        assert!(overage.description.contains("6 hrs overage"));
        assert_eq!(payload.due_date, "2025-12-31");
        assert_eq!(payload.total_amount(), 3000.0 + 6.0 * 175.0);
    }

    #[test]
    fn test_build_invoice_without_overage_skips_overage_line() {
        let config = sample_config();
        let breakdown = BillingBreakdown::compute(&config, 10.0);
        let prices = HashMap::from([("7".to_string(), 1500.0), ("8".to_string(), 1500.0)]);
        let invoice_date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();

        let payload =
            build_client_invoice(&config, &breakdown, &prices, "2025-12", "2025-11", invoice_date).unwrap();
        assert_eq!(payload.line.len(), 2);
    }

    #[test]
    fn test_missing_price_fails_instead_of_defaulting() {
        let config = sample_config();
        let breakdown = BillingBreakdown::compute(&config, 10.0);
        let prices = HashMap::from([("7".to_string(), 1500.0)]);
        let invoice_date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();

        let err = build_client_invoice(&config, &breakdown, &prices, "2025-12", "2025-11", invoice_date)
            .unwrap_err();
        match err {
            BillingError::PriceLookupFailed { item_id, .. } => assert_eq!(item_id, "8"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_customer_id() {
        let mut config = sample_config();
        config.qb_customer_id = String::new();
        let breakdown = BillingBreakdown::compute(&config, 10.0);
        let err = build_client_invoice(
            &config,
            &breakdown,
            &HashMap::new(),
            "2025-12",
            "2025-11",
            NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::MissingCustomerId { .. }));
    }
}
