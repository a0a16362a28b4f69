//! Request/response firer over reqwest

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use super::{error_ids, HttpRequest, RequestFirer, TransportResponse};

/// Fires sync events as HTTP requests
#[derive(Debug, Clone, Default)]
pub struct HttpFirer {
    client: Client,
}

impl HttpFirer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing client (shared connection pool, custom TLS, ...)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestFirer for HttpFirer {
    async fn fire(&self, request: HttpRequest) -> TransportResponse {
        let method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return TransportResponse::failure(
                    None,
                    "invalid_method",
                    &format!("Unsupported method {}", request.method),
                )
            }
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .header("accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.data {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => return failure_from_error(&e),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return failure_from_error(&e),
        };
        debug!("{} {} -> {}", request.method, request.url, status);

        TransportResponse {
            success: status.is_success(),
            status: Some(status.as_u16()),
            data: parse_body(&text),
        }
    }
}

/// Map a reqwest failure onto the error ids the classifier understands
fn failure_from_error(error: &reqwest::Error) -> TransportResponse {
    if error.is_timeout() {
        TransportResponse::failure(Some(408), error_ids::REQUEST_TIMEOUT, &error.to_string())
    } else {
        TransportResponse::failure(None, error_ids::NETWORK_ERROR, &error.to_string())
    }
}

/// JSON bodies are kept as-is; anything else is wrapped as a string
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
