use std::{fmt, time::SystemTime};

use url::Url;

use crate::{category::ResourceCategory, response::HttpResponse};

/// Generic error type for the rate limit middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A `Result` typedef to use with the [`BoxError`] type
pub type Result<T> = std::result::Result<T, BoxError>;

/// Error type returned when a request hits, or is prevented by, an active
/// primary rate limit.
///
/// The error travels through the [`BoxError`] channel and can be recovered
/// with [`std::error::Error`] downcasting:
///
/// ```no_run
/// use github_ratelimit::RateLimitReachedError;
/// # fn handle(error: github_ratelimit::BoxError) {
/// if let Some(reached) = error.downcast_ref::<RateLimitReachedError>() {
///     println!("limited until {:?}", reached.reset_time);
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimitReachedError {
    /// Url of the request that was rejected
    pub url: Url,
    /// The category whose quota is exhausted
    pub category: ResourceCategory,
    /// When the limit lifts, if the server advertised it
    pub reset_time: Option<SystemTime>,
    /// The response that triggered the limit; synthesized for requests
    /// short-circuited while a limit was already active
    pub response: HttpResponse,
}

impl fmt::Display for RateLimitReachedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reset = match self.reset_time {
            Some(time) => httpdate::fmt_http_date(time),
            None => "an unknown time".to_string(),
        };
        write!(
            f,
            "primary rate limit reached on request to {} with category: {}. wait until {} before sending more requests.",
            self.url, self.category, reset
        )
    }
}

impl std::error::Error for RateLimitReachedError {}
