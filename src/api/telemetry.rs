use log::{error, info};

use super::error::ErrorDescriptor;

const REDACTED: &str = "[REDACTED]";

/// One outbound request as seen by the telemetry layer. Ephemeral: built per
/// attempt, dropped once logged. Headers are redacted before they get here.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    pub correlation_id: String,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub attempt: u32,
}

/// Observability seam for the request executor. Injected explicitly so tests
/// can run without global logger state and so no caller ever wires secrets
/// into a log sink by accident.
pub trait TelemetrySink: Send + Sync {
    fn record_request(&self, attempt: &RequestAttempt);
    fn record_response(&self, correlation_id: &str, status: u16, url: &str, intuit_tid: Option<&str>);
    fn record_error(&self, descriptor: &ErrorDescriptor);
}

/// Default sink backed by the `log` crate.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record_request(&self, attempt: &RequestAttempt) {
        info!(
            "[{}] API REQUEST (attempt {}): {} {}",
            attempt.correlation_id, attempt.attempt, attempt.method, attempt.url
        );
        for (name, value) in &attempt.headers {
            info!("[{}]   {}: {}", attempt.correlation_id, name, value);
        }
    }

    fn record_response(&self, correlation_id: &str, status: u16, url: &str, intuit_tid: Option<&str>) {
        info!("[{}] API RESPONSE: {} from {}", correlation_id, status, url);
        if let Some(tid) = intuit_tid {
            // Reference id for escalation to QuickBooks support.
            info!("[{}] intuit_tid: {}", correlation_id, tid);
        }
    }

    fn record_error(&self, descriptor: &ErrorDescriptor) {
        error!(
            "API ERROR: {} - {} ({} {})",
            descriptor.error_type, descriptor.message, descriptor.status_code, descriptor.url
        );
        error!("Troubleshooting: {}", descriptor.troubleshooting_steps.join("; "));
        if let Some(tid) = &descriptor.intuit_tid {
            error!("Reference id for QuickBooks support: {}", tid);
        }
    }
}

/// Replace the value of any Authorization header before it can reach a sink.
pub fn redact_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            if name.eq_ignore_ascii_case("authorization") {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
