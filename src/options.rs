//! Client and stream configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Environment variable holding the API base URL.
pub const API_URL_ENV: &str = "PRACTICE_API_URL";

/// Base URL used when [`API_URL_ENV`] is unset.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default rendering frame for coalesced updates (~60 fps).
pub const DEFAULT_FRAME: Duration = Duration::from_millis(16);

/// Default time to wait for the next stream event.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP configuration for [`crate::session::SessionClient`].
///
/// # Example
/// ```rust
/// use empathy_practice::options::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::new("http://127.0.0.1:8000/")
///     .with_timeout(Duration::from_secs(10))
///     .with_header("x-client".to_string(), "terminal".to_string());
///
/// assert_eq!(options.base_url, "http://127.0.0.1:8000");
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API host, without a trailing slash
    pub base_url: String,

    /// Timeout of plain (non-streaming) requests
    pub timeout: Option<Duration>,

    /// Timeout for establishing connections, applies to every request
    pub connect_timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ClientOptions {
    /// Create options for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            timeout: None,
            connect_timeout: None,
            proxy: None,
            extra_headers: None,
        }
    }

    /// Read the base URL from `PRACTICE_API_URL`, falling back to
    /// `http://localhost:8000`.
    pub fn from_env() -> Self {
        Self::new(base_url_from(std::env::var(API_URL_ENV).ok()))
    }

    /// Set the timeout of plain requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Join an API path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

fn base_url_from(value: Option<String>) -> String {
    value
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

fn normalize_base_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// When the stream consumer invokes its update callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Once per token, synchronously.
    EveryToken,
    /// At most once per `frame`, carrying the latest text.
    Coalesced { frame: Duration },
}

impl UpdateMode {
    /// Coalesced updates at the default frame rate.
    pub fn coalesced() -> Self {
        UpdateMode::Coalesced {
            frame: DEFAULT_FRAME,
        }
    }
}

/// Options for [`crate::stream::consume`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub update: UpdateMode,

    /// Longest wait for the next event; `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl StreamOptions {
    pub fn with_update(mut self, update: UpdateMode) -> Self {
        self.update = update;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            update: UpdateMode::EveryToken,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_fallback() {
        assert_eq!(base_url_from(None), DEFAULT_API_URL);
        assert_eq!(base_url_from(Some("  ".to_string())), DEFAULT_API_URL);
        assert_eq!(
            base_url_from(Some("https://practice.example.com".to_string())),
            "https://practice.example.com"
        );
    }

    #[test]
    fn test_endpoint_joins_path() {
        let options = ClientOptions::new("http://localhost:9000//");
        assert_eq!(options.base_url, "http://localhost:9000");
        assert_eq!(
            options.endpoint("/api/sessions/"),
            "http://localhost:9000/api/sessions/"
        );
    }

    #[test]
    fn test_stream_options_default() {
        let options = StreamOptions::default();
        assert_eq!(options.update, UpdateMode::EveryToken);
        assert_eq!(options.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));

        let options = options
            .with_update(UpdateMode::coalesced())
            .with_idle_timeout(None);
        assert_eq!(
            options.update,
            UpdateMode::Coalesced {
                frame: DEFAULT_FRAME
            }
        );
        assert_eq!(options.idle_timeout, None);
    }
}
