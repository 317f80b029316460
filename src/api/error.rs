use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local};
use log::warn;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::Value;

/// Response header carrying the provider's opaque trace id. Quoted verbatim
/// when escalating a failed call to QuickBooks support.
pub const INTUIT_TID_HEADER: &str = "intuit_tid";
const RETRY_AFTER_HEADER: &str = "Retry-After";
const DEFAULT_RETRY_AFTER_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ValidationError,
    BusinessValidationError,
    SyntaxError,
    AuthenticationError,
    AuthorizationError,
    ResourceNotFound,
    RateLimitExceeded,
    ServerError,
    Unknown,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorType::ValidationError => "validation_error",
            ErrorType::BusinessValidationError => "business_validation_error",
            ErrorType::SyntaxError => "syntax_error",
            ErrorType::AuthenticationError => "authentication_error",
            ErrorType::AuthorizationError => "authorization_error",
            ErrorType::ResourceNotFound => "resource_not_found",
            ErrorType::RateLimitExceeded => "rate_limit_exceeded",
            ErrorType::ServerError => "server_error",
            ErrorType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ClientError,
    AuthError,
    RateLimit,
    ServerError,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::AuthError => "auth_error",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Structured description of one failed API call.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDescriptor {
    pub timestamp: DateTime<Local>,
    pub status_code: u16,
    pub url: String,
    pub intuit_tid: Option<String>,
    pub error_type: ErrorType,
    pub error_category: ErrorCategory,
    pub message: String,
    pub troubleshooting_steps: Vec<String>,
    pub user_message: String,
    pub retry_recommended: bool,
    pub retry_after_seconds: Option<u64>,
    pub raw_error: Value,
}

/// Map a raw HTTP failure onto the error taxonomy. Pure aside from one log
/// line; the caller decides what to do with `retry_recommended`.
pub fn classify(status: u16, url: &str, headers: &HeaderMap, body: &str) -> ErrorDescriptor {
    let intuit_tid = header_value(headers, INTUIT_TID_HEADER);
    let raw_error = serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()));

    let mut descriptor = ErrorDescriptor {
        timestamp: Local::now(),
        status_code: status,
        url: url.to_string(),
        intuit_tid,
        error_type: ErrorType::Unknown,
        error_category: ErrorCategory::Unknown,
        message: format!("Unexpected response status {}", status),
        troubleshooting_steps: Vec::new(),
        user_message: "An unexpected error occurred.".to_string(),
        retry_recommended: false,
        retry_after_seconds: None,
        raw_error,
    };

    match status {
        400 => classify_bad_request(&mut descriptor),
        401 => {
            descriptor.error_type = ErrorType::AuthenticationError;
            descriptor.error_category = ErrorCategory::AuthError;
            descriptor.message = "Unauthorized - Invalid or expired access token".to_string();
            descriptor.troubleshooting_steps = steps(&[
                "Check access token validity",
                "Refresh access token using refresh token",
                "Verify token has not expired",
                "Re-authorize if refresh token is expired",
            ]);
            descriptor.user_message =
                "Authentication failed. The system will attempt to refresh your credentials.".to_string();
            descriptor.retry_recommended = true;
        }
        403 => {
            descriptor.error_type = ErrorType::AuthorizationError;
            descriptor.error_category = ErrorCategory::AuthError;
            descriptor.message = "Forbidden - Insufficient permissions or CSRF error".to_string();
            descriptor.troubleshooting_steps = steps(&[
                "Verify app has required permissions",
                "Check CSRF protection headers",
                "Ensure proper referrer headers",
                "Validate user agent string",
            ]);
            descriptor.user_message = "Access denied. Please contact support if this persists.".to_string();
            descriptor.retry_recommended = false;
        }
        404 => {
            descriptor.error_type = ErrorType::ResourceNotFound;
            descriptor.error_category = ErrorCategory::ClientError;
            descriptor.message = "Resource not found".to_string();
            descriptor.troubleshooting_steps = steps(&[
                "Verify resource ID is correct",
                "Check if resource exists in current company",
                "Ensure proper endpoint URL",
                "Verify company ID (realm_id) is correct",
            ]);
            descriptor.user_message = "The requested resource could not be found.".to_string();
            descriptor.retry_recommended = false;
        }
        429 => {
            let retry_after = header_value(headers, RETRY_AFTER_HEADER)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECONDS);
            descriptor.error_type = ErrorType::RateLimitExceeded;
            descriptor.error_category = ErrorCategory::RateLimit;
            descriptor.message = format!("Rate limit exceeded - retry after {} seconds", retry_after);
            descriptor.retry_after_seconds = Some(retry_after);
            descriptor.troubleshooting_steps = vec![
                format!("Wait {} seconds before retrying", retry_after),
                "Implement exponential backoff".to_string(),
                "Consider reducing request frequency".to_string(),
                "Review rate limit quotas".to_string(),
            ];
            descriptor.user_message =
                format!("Request rate limit exceeded. Please wait {} seconds.", retry_after);
            descriptor.retry_recommended = true;
        }
        s if s >= 500 => {
            descriptor.error_type = ErrorType::ServerError;
            descriptor.error_category = ErrorCategory::ServerError;
            descriptor.message = format!("Server error ({}) - QuickBooks service issue", s);
            descriptor.troubleshooting_steps = steps(&[
                "Retry request after brief delay",
                "Check QuickBooks service status",
                "Implement exponential backoff",
                "Contact QuickBooks support if persistent",
            ]);
            descriptor.user_message =
                "Temporary service issue. The system will retry automatically.".to_string();
            descriptor.retry_recommended = true;
        }
        _ => {}
    }

    warn!(
        "API error classified: {} {} -> {} ({})",
        status, descriptor.url, descriptor.error_type, descriptor.error_category
    );
    descriptor
}

/// 400s carry a structured `Fault` body distinguishing field-level validation
/// failures from business-rule conflicts. A body that does not parse as JSON
/// is treated as a syntax error.
fn classify_bad_request(descriptor: &mut ErrorDescriptor) {
    descriptor.error_category = ErrorCategory::ClientError;
    descriptor.retry_recommended = false;

    let detail = descriptor.raw_error.as_object().map(|_| {
        descriptor.raw_error["Fault"]["Error"][0]["Detail"]
            .as_str()
            .unwrap_or("")
            .to_string()
    });

    match detail {
        Some(detail) if detail.contains("BusinessValidationFault") => {
            descriptor.error_type = ErrorType::BusinessValidationError;
            descriptor.message = format!("Validation Error: {}", detail);
            descriptor.troubleshooting_steps = steps(&[
                "Check business logic constraints",
                "Verify entity relationships exist",
                "Ensure account types are appropriate",
                "Check for duplicate entries",
            ]);
            descriptor.user_message =
                "Business rule violation. Please review the data and correct any conflicts.".to_string();
        }
        Some(detail) => {
            descriptor.error_type = ErrorType::ValidationError;
            descriptor.message = format!("Validation Error: {}", detail);
            descriptor.troubleshooting_steps = steps(&[
                "Check required fields are provided",
                "Validate data types and formats",
                "Ensure field values meet QuickBooks constraints",
                "Review API documentation for field requirements",
            ]);
            descriptor.user_message = "Invalid data provided. Please check your input and try again.".to_string();
        }
        None => {
            descriptor.error_type = ErrorType::SyntaxError;
            descriptor.message = "Bad Request - Syntax or validation error".to_string();
            descriptor.troubleshooting_steps = steps(&[
                "Check request syntax",
                "Validate JSON format",
                "Review API documentation",
            ]);
            descriptor.user_message = "Request format error. Please check your data and try again.".to_string();
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|v| v.to_string())
}

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Session-scoped accumulation of classified failures. Never persisted; the
/// log sink is the only durable record.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Vec<ErrorDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub error_categories: HashMap<ErrorCategory, usize>,
    pub intuit_tids: Vec<String>,
}

impl ErrorLog {
    pub fn record(&mut self, descriptor: ErrorDescriptor) {
        self.entries.push(descriptor);
    }

    pub fn entries(&self) -> &[ErrorDescriptor] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut error_categories = HashMap::new();
        for entry in &self.entries {
            *error_categories.entry(entry.error_category).or_insert(0) += 1;
        }
        ErrorSummary {
            total_errors: self.entries.len(),
            error_categories,
            intuit_tids: self
                .entries
                .iter()
                .filter_map(|e| e.intuit_tid.clone())
                .collect(),
        }
    }
}
