pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod telemetry;

pub use auth::{AuthManager, RefreshError, TokenState};
pub use client::{QuickBooksClient, RequestError, RequestOptions};
pub use error::{ErrorCategory, ErrorDescriptor, ErrorLog, ErrorType};
pub use telemetry::{LogSink, RequestAttempt, TelemetrySink};
