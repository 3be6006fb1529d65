//! Errors surfaced by the HTTP collaborators.
//!
//! Display strings carry the upstream status tokens verbatim (`ZERO_RESULTS`,
//! `OVER_QUERY_LIMIT`, HTTP codes) because row failures are classified by
//! message content.

use reqwest::{Response, StatusCode};

/// Maximum number of response body characters kept in an error.
const BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport failure; the request URL is stripped since it carries keys.
    /// Format with `{:#}` to include the cause.
    #[error("{service} request failed")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} request timeout")]
    Timeout { service: &'static str },

    #[error("{service} returned HTTP {status}: {body}")]
    HttpStatus {
        service: &'static str,
        status: StatusCode,
        body: String,
    },

    /// Application-level status inside a 200 response.
    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: String,
        message: String,
    },
}

impl ApiError {
    pub fn http(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout { service }
        } else {
            ApiError::Transport {
                service,
                source: err.without_url(),
            }
        }
    }

    pub fn status(service: &'static str, status: &str, message: Option<&str>) -> Self {
        ApiError::Status {
            service,
            status: status.to_string(),
            message: message.unwrap_or("no details").to_string(),
        }
    }

    /// Pass successful responses through, turn the rest into `HttpStatus`.
    pub async fn check_status(service: &'static str, response: Response) -> Result<Response, Self> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::HttpStatus {
            service,
            status,
            body: body.chars().take(BODY_PREVIEW_CHARS).collect(),
        })
    }
}
