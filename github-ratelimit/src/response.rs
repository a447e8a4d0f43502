use http::{HeaderMap, HeaderValue, StatusCode, Version};
use url::Url;

use crate::category::ResourceCategory;

/// `retry-after` header: seconds to wait before sending more requests
pub const RETRY_AFTER: &str = "retry-after";
/// `x-ratelimit-remaining` header: requests left in the current window
pub const XRATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// `x-ratelimit-reset` header: Unix seconds at which the window resets
pub const XRATELIMIT_RESET: &str = "x-ratelimit-reset";
/// `x-ratelimit-resource` header: the category the response counts against
pub const XRATELIMIT_RESOURCE: &str = "x-ratelimit-resource";

/// A basic generic type that represents an HTTP response
///
/// The body is owned, so rate limit classification never consumes the byte
/// stream seen by downstream readers.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP response status code
    pub status: StatusCode,
    /// HTTP response headers
    pub headers: HeaderMap,
    /// HTTP response body
    pub body: Vec<u8>,
    /// HTTP response url
    pub url: Url,
    /// HTTP response version
    pub version: Version,
}

impl HttpResponse {
    /// Returns the named header as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the named header parsed as an integer.
    ///
    /// Missing, non-UTF-8, and non-numeric values all yield `None`.
    #[must_use]
    pub fn header_i64(&self, name: &str) -> Option<i64> {
        self.header_str(name).and_then(|value| value.parse().ok())
    }

    /// Whether the status is one of the rate limit statuses (403 or 429).
    #[must_use]
    pub fn rate_limit_status(&self) -> bool {
        self.status == StatusCode::FORBIDDEN
            || self.status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Synthesizes the failure response served while a primary rate limit
    /// is active: status 403, empty body, `x-ratelimit-remaining: 0` and
    /// the category header set.
    #[must_use]
    pub fn rate_limited(url: Url, category: ResourceCategory) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(XRATELIMIT_REMAINING, HeaderValue::from_static("0"));
        headers.insert(
            XRATELIMIT_RESOURCE,
            HeaderValue::from_static(category.as_str()),
        );
        Self {
            status: StatusCode::FORBIDDEN,
            headers,
            body: Vec::new(),
            url,
            version: Version::HTTP_11,
        }
    }
}
