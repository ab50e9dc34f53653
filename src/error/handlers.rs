//! Standardized error construction for HTTP responses and transport failures

use crate::error::RegistryError;
use reqwest::StatusCode;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Build a protocol error for an unexpected registry status.
    ///
    /// The raw body is always kept; a short hint is prepended for the statuses
    /// users hit most often.
    pub fn handle_registry_error(status: StatusCode, error_text: &str, operation: &str) -> RegistryError {
        let body = match status.as_u16() {
            403 => format!("forbidden, insufficient permissions: {}", error_text),
            404 => format!("resource not found: {}", error_text),
            429 => format!("rate limited: {}", error_text),
            502 | 503 => format!("registry unavailable: {}", error_text),
            _ => error_text.to_string(),
        };

        RegistryError::protocol(operation, status.as_u16(), body)
    }

    /// Handle token endpoint failures
    pub fn handle_auth_error(status: StatusCode, error_text: &str, realm: &str) -> RegistryError {
        let reason = match status.as_u16() {
            400 => "invalid token request parameters".to_string(),
            401 => "invalid credentials provided".to_string(),
            403 => "access denied, insufficient permissions".to_string(),
            404 => "authentication endpoint not found".to_string(),
            _ => format!("unexpected status {}", status),
        };

        if error_text.is_empty() {
            RegistryError::Authentication(format!("token request to {} failed: {}", realm, reason))
        } else {
            RegistryError::Authentication(format!(
                "token request to {} failed: {}: {}",
                realm, reason, error_text
            ))
        }
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> RegistryError {
        let text = error.to_string();
        if error.is_timeout() {
            RegistryError::Network(format!("{} timed out: {}", context, error))
        } else if error.is_connect() {
            RegistryError::Network(format!("Connection error during {}: {}", context, error))
        } else if text.contains("dns") {
            RegistryError::Network(format!("DNS resolution error for {}: {}", context, error))
        } else if text.contains("certificate") {
            RegistryError::Network(format!("TLS certificate error during {}: {}", context, error))
        } else {
            RegistryError::Network(format!("{} network error: {}", context, error))
        }
    }
}
