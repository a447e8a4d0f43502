#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! Client middleware for avoiding GitHub rate limits, covering both
//! documented regimes:
//!
//! - the *primary* (per-category quota) limit, handled by gating requests
//! per resource category and short-circuiting with a synthesized failure
//! while a category's quota is exhausted, and
//! - the *secondary* (abuse/burst) limit, handled by sleeping out the
//! advertised cooldown and retrying.
//!
//! This crate provides the core, client-agnostic functionality: response
//! classification, category resolution, the two stateful interceptors, and
//! the combined limiter that stacks them so that secondary retries flow
//! back through the primary gate. See the companion crate
//! `github-ratelimit-reqwest` for the [reqwest] integration.
//!
//! [reqwest]: https://docs.rs/reqwest
//!
//! ## Basic Usage
//!
//! ```rust
//! use github_ratelimit::{
//!     GitHubRateLimiter, PrimaryCallbackContext, PrimaryOption,
//!     RateLimitOption, SecondaryOption,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! let limiter = GitHubRateLimiter::new([
//!     RateLimitOption::from(PrimaryOption::LimitDetectedCallback(
//!         Arc::new(|ctx: &PrimaryCallbackContext<'_>| {
//!             eprintln!("{} quota exhausted", ctx.category);
//!         }),
//!     )),
//!     RateLimitOption::from(SecondaryOption::TotalSleepLimit {
//!         limit: Duration::from_secs(300),
//!         on_exceeded: None,
//!     }),
//! ]);
//! ```
//!
//! ## Per-Request Overrides
//!
//! Requests can override the base configuration by carrying
//! [`PrimaryOverrides`] and/or [`SecondaryOverrides`] in their extensions;
//! the base configuration is shallow copied for that request only. With no
//! overrides present the base configuration is used as-is.
//!
//! ## Detection
//!
//! Primary limits are recognized from the `x-ratelimit-remaining` and
//! `x-ratelimit-reset` headers; secondary limits from the response body
//! (message prefix or documentation URL suffix) plus the `retry-after`
//! header. A 403 that matches neither shape passes through untouched.

mod category;
mod detect;
mod error;
mod response;

pub mod primary;
pub mod secondary;

use http::Method;
use url::Url;

pub use category::ResourceCategory;
pub use detect::{
    is_primary_limit, is_secondary_limit, parse_primary_reset,
    parse_secondary_reset, DOCUMENTATION_SUFFIXES, SECONDARY_LIMIT_MESSAGE,
};
pub use error::{BoxError, RateLimitReachedError, Result};
pub use primary::{
    PrimaryCallbackContext, PrimaryOption, PrimaryOverrides,
    PrimaryRateLimiter, RateLimitState,
};
pub use response::{
    HttpResponse, RETRY_AFTER, XRATELIMIT_REMAINING, XRATELIMIT_RESET,
    XRATELIMIT_RESOURCE,
};
pub use secondary::{
    SecondaryCallbackContext, SecondaryOption, SecondaryOverrides,
    SecondaryRateLimiter,
};

/// Describes the functionality required for interfacing with HTTP client
/// middleware.
///
/// [`remote_fetch`] must be repeatable: the secondary limiter retries a
/// request after waiting out a cooldown.
///
/// [`remote_fetch`]: Middleware::remote_fetch
#[async_trait::async_trait]
pub trait Middleware: Send {
    /// Attempts to determine the requested url
    fn url(&self) -> Result<Url>;
    /// Attempts to determine the request method
    fn method(&self) -> Result<Method>;
    /// Per-request primary configuration overrides carried by the request
    fn primary_overrides(&self) -> Option<PrimaryOverrides> {
        None
    }
    /// Per-request secondary configuration overrides carried by the request
    fn secondary_overrides(&self) -> Option<SecondaryOverrides> {
        None
    }
    /// Attempts to fetch the upstream resource and return an
    /// [`HttpResponse`]
    async fn remote_fetch(&mut self) -> Result<HttpResponse>;
}

/// Option accepted by [`GitHubRateLimiter::new`], targeting one of the two
/// layers.
#[derive(Debug, Clone)]
pub enum RateLimitOption {
    /// Applied to the primary (per-category quota) layer
    Primary(PrimaryOption),
    /// Applied to the secondary (abuse/burst) layer
    Secondary(SecondaryOption),
}

impl From<PrimaryOption> for RateLimitOption {
    fn from(option: PrimaryOption) -> Self {
        Self::Primary(option)
    }
}

impl From<SecondaryOption> for RateLimitOption {
    fn from(option: SecondaryOption) -> Self {
        Self::Secondary(option)
    }
}

/// The combined limiter: a secondary limiter stacked over a primary
/// limiter, so that secondary retries flow back through the primary gate.
#[derive(Debug)]
pub struct GitHubRateLimiter {
    primary: PrimaryRateLimiter,
    secondary: SecondaryRateLimiter,
}

impl GitHubRateLimiter {
    /// Creates the combined limiter, partitioning the options between the
    /// two layers.
    pub fn new(options: impl IntoIterator<Item = RateLimitOption>) -> Self {
        let mut primary_options = Vec::new();
        let mut secondary_options = Vec::new();
        for option in options {
            match option {
                RateLimitOption::Primary(option) => {
                    primary_options.push(option)
                }
                RateLimitOption::Secondary(option) => {
                    secondary_options.push(option)
                }
            }
        }
        Self {
            primary: PrimaryRateLimiter::new(primary_options),
            secondary: SecondaryRateLimiter::new(secondary_options),
        }
    }

    /// The primary (per-category quota) layer.
    #[must_use]
    pub fn primary(&self) -> &PrimaryRateLimiter {
        &self.primary
    }

    /// The secondary (abuse/burst) layer.
    #[must_use]
    pub fn secondary(&self) -> &SecondaryRateLimiter {
        &self.secondary
    }

    /// Runs a request through both limiters.
    pub async fn run<M: Middleware>(
        &self,
        middleware: &mut M,
    ) -> Result<HttpResponse> {
        let mut gated =
            Gated { primary: &self.primary, inner: middleware };
        self.secondary.run(&mut gated).await
    }
}

// Routes secondary retries back through the primary gate.
struct Gated<'a, M> {
    primary: &'a PrimaryRateLimiter,
    inner: &'a mut M,
}

#[async_trait::async_trait]
impl<M: Middleware> Middleware for Gated<'_, M> {
    fn url(&self) -> Result<Url> {
        self.inner.url()
    }

    fn method(&self) -> Result<Method> {
        self.inner.method()
    }

    fn primary_overrides(&self) -> Option<PrimaryOverrides> {
        self.inner.primary_overrides()
    }

    fn secondary_overrides(&self) -> Option<SecondaryOverrides> {
        self.inner.secondary_overrides()
    }

    async fn remote_fetch(&mut self) -> Result<HttpResponse> {
        self.primary.run(&mut *self.inner).await
    }
}
