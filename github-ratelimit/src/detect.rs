//! Response classification for both rate limit regimes.

use std::time::{Duration, SystemTime};

use serde::Deserialize;

use crate::response::{
    HttpResponse, RETRY_AFTER, XRATELIMIT_REMAINING, XRATELIMIT_RESET,
};

/// Prefix of the `message` body field on secondary limit responses
pub const SECONDARY_LIMIT_MESSAGE: &str =
    "You have exceeded a secondary rate limit";

/// Known suffixes of the `documentation_url` body field on secondary limit
/// responses
pub const DOCUMENTATION_SUFFIXES: [&str; 2] =
    ["secondary-rate-limits", "#abuse-rate-limits"];

/// Body shape of a rate limit response.
///
/// Both fields are optional; an authentic failure sharing the 403/429 status
/// typically carries a different `message` and `documentation_url`.
#[derive(Debug, Default, Deserialize)]
struct SecondaryLimitBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    documentation_url: String,
}

impl SecondaryLimitBody {
    /// Checks the prefix of the message and the suffix of the documentation
    /// URL, in case either is modified in the future.
    /// <https://docs.github.com/en/rest/overview/rate-limits-for-the-rest-api#about-secondary-rate-limits>
    fn indicates_secondary_limit(&self) -> bool {
        self.message.starts_with(SECONDARY_LIMIT_MESSAGE)
            || DOCUMENTATION_SUFFIXES
                .iter()
                .any(|suffix| self.documentation_url.ends_with(suffix))
    }
}

/// Whether the response reports an exhausted primary rate limit quota.
#[must_use]
pub fn is_primary_limit(response: &HttpResponse) -> bool {
    response.rate_limit_status()
        && response.header_i64(XRATELIMIT_REMAINING) == Some(0)
}

/// Whether the response is a legitimate secondary rate limit.
///
/// Responses carrying `x-ratelimit-remaining: 0` are primary limits and are
/// never classified as secondary. Body read and JSON errors demote the
/// response to "not a limit" rather than propagating.
#[must_use]
pub fn is_secondary_limit(response: &HttpResponse) -> bool {
    if !response.rate_limit_status() {
        return false;
    }

    // a primary rate limit
    if response.header_i64(XRATELIMIT_REMAINING) == Some(0) {
        return false;
    }

    match serde_json::from_slice::<SecondaryLimitBody>(&response.body) {
        Ok(body) => body.indicates_secondary_limit(),
        // an authentic HTTP response (not a rate limit)
        Err(_) => false,
    }
}

/// Parses the reset instant of a secondary rate limit response.
///
/// `retry-after` takes precedence over `x-ratelimit-reset`. Returns `None`
/// when the response is not a secondary limit or neither header carries a
/// positive value; callers pass such responses through unchanged.
#[must_use]
pub fn parse_secondary_reset(response: &HttpResponse) -> Option<SystemTime> {
    if !is_secondary_limit(response) {
        return None;
    }

    // XXX: per GitHub API docs, a missing header calls for a 60 second
    // default with exponential backoff. Deferred while there are no known
    // cases of missing headers.
    parse_retry_after(response).or_else(|| parse_reset_epoch(response))
}

/// Parses the reset instant of a primary rate limit response, if the
/// response reports one.
#[must_use]
pub fn parse_primary_reset(response: &HttpResponse) -> Option<SystemTime> {
    if !is_primary_limit(response) {
        return None;
    }
    parse_reset_epoch(response)
}

// per GitHub API, retry-after is set to the number of seconds to wait
fn parse_retry_after(response: &HttpResponse) -> Option<SystemTime> {
    let seconds = response.header_i64(RETRY_AFTER)?;
    if seconds <= 0 {
        return None;
    }
    Some(SystemTime::now() + Duration::from_secs(seconds as u64))
}

// per GitHub API, x-ratelimit-reset is set to seconds since epoch (UTC)
fn parse_reset_epoch(response: &HttpResponse) -> Option<SystemTime> {
    let seconds = response.header_i64(XRATELIMIT_RESET)?;
    if seconds <= 0 {
        return None;
    }
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(seconds as u64))
}
