//! Request-scoped errors
//!
//! Each variant is terminal for the request that raised it and is turned
//! into a plain-text response; nothing here is propagated to other
//! requests or to the accept loop.

use crate::middleware::context::{full_body, HttpResponse};
use http::header::{CONTENT_TYPE, SERVER};
use hyper::{Response, StatusCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Path matched a forbidden pattern
    #[error("Forbidden")]
    BlacklistRejection { path: String },

    /// Rewritten target still has placeholders, or is not a usable URL
    #[error("[PROXY] Invalid target URL: {url}{}", unresolved_suffix(.unresolved))]
    ProxyConfig { url: String, unresolved: Vec<String> },

    /// Outbound connection to the target failed
    #[error("[PROXY] {message}: {url}")]
    ProxyUpstream { message: String, url: String },
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::BlacklistRejection { .. } => StatusCode::FORBIDDEN,
            PipelineError::ProxyConfig { .. } | PipelineError::ProxyUpstream { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn into_response(self) -> HttpResponse {
        let status = self.status();
        let body = match self {
            PipelineError::BlacklistRejection { .. } => {
                status.canonical_reason().unwrap_or("Forbidden").to_string()
            }
            other => other.to_string(),
        };

        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(SERVER, crate::SERVER_NAME)
            .body(full_body(body))
            .unwrap_or_else(|_| plain_status(status))
    }
}

fn unresolved_suffix(unresolved: &[String]) -> String {
    if unresolved.is_empty() {
        String::new()
    } else {
        format!(" (unresolved {})", unresolved.join(", "))
    }
}

/// Bare response carrying only a status code
pub fn plain_status(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(full_body(
        status.canonical_reason().unwrap_or_default().to_string(),
    ));
    *response.status_mut() = status;
    response
}
