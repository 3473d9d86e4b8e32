//! HTTP client utilities shared by plain and streaming requests.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use crate::client::ClientError;
use crate::options::ClientOptions;

/// Build a configured HTTP client.
///
/// No overall request timeout is set here, since it would also bound the
/// lifetime of a streamed body. Plain requests apply it per request.
pub fn build_http_client(options: &ClientOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if any are configured.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Turn a non-success response into [`ClientError::RequestFailed`].
///
/// The server reports failures as `{"detail": ...}`; anything else is passed
/// through as the raw body.
pub async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(%status, error = %e, "could not read error body");
            String::new()
        }
    };
    warn!(%status, "request failed");
    Err(ClientError::RequestFailed {
        status,
        detail: error_detail(status, &body),
    })
}

/// Detail text of a failed response; an empty body falls back to the
/// status's canonical reason.
fn error_detail(status: StatusCode, body: &str) -> String {
    if body.trim().is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.to_string(),
    }
}
