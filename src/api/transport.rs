//! Transport boundary for all upstream I/O.
//!
//! The sync core never touches `reqwest` directly: every call goes through the
//! [`Transport`] trait, which performs exactly one request and reports what
//! came back. Retrying is the caller's job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER,
    RETRY_AFTER, USER_AGENT,
};
use reqwest::{Client, Method, RequestBuilder};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::user_agent;

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "https://xueqiu.com";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by a transport before any response was received.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete in time.
    #[error("timeout requesting {path}")]
    Timeout {
        /// Request path.
        path: String,
    },

    /// Connection-level failure (DNS, refused, TLS, reset).
    #[error("network error requesting {path}: {message}")]
    Network {
        /// Request path.
        path: String,
        /// Underlying error text.
        message: String,
    },

    /// The configured cookie cannot be sent as a header value.
    #[error("cookie contains characters not allowed in a header")]
    InvalidCookie,

    /// The path could not be joined onto the base URL.
    #[error("invalid request path {path}")]
    InvalidPath {
        /// Request path.
        path: String,
    },
}

impl TransportError {
    fn from_reqwest(path: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                path: path.to_string(),
            }
        } else {
            Self::Network {
                path: path.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// One upstream response, reduced to what the sync core inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header value, if present.
    pub content_type: Option<String>,
    /// Raw `Retry-After` header value, if present.
    pub retry_after: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Builds a JSON response with status 200.
    #[must_use]
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json;charset=UTF-8".to_string()),
            retry_after: None,
            body: body.into(),
        }
    }

    /// Builds an HTML response with the given status.
    #[must_use]
    pub fn html(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: Some("text/html; charset=utf-8".to_string()),
            retry_after: None,
            body: body.into(),
        }
    }

    /// Sets the `Retry-After` header value.
    #[must_use]
    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    /// Sets the status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Returns true when the declared content type is HTML.
    #[must_use]
    pub fn is_html_content_type(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }

    /// Returns true when the body starts like an HTML document.
    #[must_use]
    pub fn body_looks_like_html(&self) -> bool {
        let head = String::from_utf8_lossy(&self.body[..self.body.len().min(256)]);
        head.trim_start().starts_with('<')
    }

    /// Returns the body decoded as UTF-8 (lossy).
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs exactly one upstream request.
///
/// Implementations must surface the `Retry-After` header when present and must
/// not retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `method path?params` and returns the raw response.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, TransportError>;
}

/// Hook applied to every outgoing request (header rotation and the like).
pub type RequestDecorator = Arc<dyn Fn(RequestBuilder) -> RequestBuilder + Send + Sync>;

/// Returns the default decorator: a fresh browser User-Agent per request.
#[must_use]
pub fn rotating_user_agent() -> RequestDecorator {
    Arc::new(|builder: RequestBuilder| {
        builder.header(USER_AGENT, user_agent::random_browser_user_agent())
    })
}

/// Production transport backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    decorator: RequestDecorator,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Builds a transport for `base_url` authenticated with the given cookie header.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the base URL or cookie is malformed or
    /// the client cannot be constructed.
    pub fn new(base_url: &str, cookie: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base = Url::parse(base_url).map_err(|_| TransportError::InvalidPath {
            path: base_url.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        let origin = base.origin().ascii_serialization();
        if let Ok(value) = HeaderValue::from_str(&format!("{origin}/")) {
            headers.insert(REFERER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(ORIGIN, value);
        }
        let mut cookie_value =
            HeaderValue::from_str(cookie.trim()).map_err(|_| TransportError::InvalidCookie)?;
        cookie_value.set_sensitive(true);
        headers.insert(COOKIE, cookie_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|error| TransportError::from_reqwest(base_url, &error))?;

        Ok(Self {
            client,
            base_url: base,
            decorator: rotating_user_agent(),
        })
    }

    /// Replaces the request decorator.
    #[must_use]
    pub fn with_decorator(mut self, decorator: RequestDecorator) -> Self {
        self.decorator = decorator;
        self
    }

    fn build_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|_| TransportError::InvalidPath {
                path: path.to_string(),
            })?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip(self, params), fields(status))]
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, TransportError> {
        let url = self.build_url(path, params)?;
        let builder = (self.decorator)(self.client.request(method, url));

        let response = builder
            .send()
            .await
            .map_err(|error| TransportError::from_reqwest(path, &error))?;

        let status = response.status().as_u16();
        tracing::Span::current().record("status", status);
        let headers = response.headers();
        let content_type = header_string(headers, CONTENT_TYPE.as_str());
        let retry_after = header_string(headers, RETRY_AFTER.as_str());

        let body = response
            .bytes()
            .await
            .map_err(|error| TransportError::from_reqwest(path, &error))?
            .to_vec();

        debug!(
            status,
            content_type = content_type.as_deref().unwrap_or(""),
            bytes = body.len(),
            "upstream response"
        );

        Ok(ApiResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
