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
//! # github-ratelimit-reqwest
//!
//! GitHub rate limit middleware for the [reqwest] HTTP client.
//!
//! This middleware handles both of GitHub's documented rate limit regimes
//! for the reqwest HTTP client library. It works as part of the
//! [reqwest-middleware] ecosystem: primary (per-category quota) limits are
//! gated per resource category and surfaced as typed errors, while
//! secondary (abuse/burst) limits are waited out and the request retried.
//!
//! [reqwest]: https://docs.rs/reqwest
//! [reqwest-middleware]: https://docs.rs/reqwest-middleware
//!
//! ```no_run
//! use reqwest::Client;
//! use reqwest_middleware::{ClientBuilder, Result};
//! use github_ratelimit_reqwest::{GitHubRateLimiter, RateLimiter};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClientBuilder::new(Client::new())
//!         .with(RateLimiter(GitHubRateLimiter::new([])))
//!         .build();
//!
//!     // Requests sent through the client respect both rate limit regimes
//!     let response = client
//!         .get("https://api.github.com/user/repos")
//!         .send()
//!         .await?;
//!     println!("Status: {}", response.status());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Handling Rate Limit Errors
//!
//! When a primary limit is active, requests fail with a typed error that
//! can be recovered by downcasting:
//!
//! ```no_run
//! use github_ratelimit_reqwest::RateLimitReachedError;
//! # fn handle(error: reqwest_middleware::Error) {
//! if let reqwest_middleware::Error::Middleware(inner) = &error {
//!     if let Some(reached) = inner.downcast_ref::<RateLimitReachedError>() {
//!         println!("{} is limited until {:?}", reached.category, reached.reset_time);
//!     }
//! }
//! # }
//! ```
//!
//! ## Per-Request Overrides
//!
//! Individual requests can override the base configuration through
//! request extensions:
//!
//! ```no_run
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use github_ratelimit_reqwest::{
//!     GitHubRateLimiter, RateLimiter, SecondaryOption, SecondaryOverrides,
//! };
//!
//! #[tokio::main]
//! async fn main() -> reqwest_middleware::Result<()> {
//!     let client = ClientBuilder::new(Client::new())
//!         .with(RateLimiter(GitHubRateLimiter::new([])))
//!         .build();
//!
//!     // This request detects secondary limits but never sleeps
//!     let response = client
//!         .get("https://api.github.com/user/repos")
//!         .with_extension(SecondaryOverrides::new([
//!             SecondaryOption::no_sleep(None),
//!         ]))
//!         .send()
//!         .await?;
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
mod error;

pub use error::{BadRequest, ReqwestError};

use http::{Extensions, Method};
use reqwest::{Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Error, Next};
use url::Url;

use github_ratelimit::{BoxError, HttpResponse, Middleware, Result};

pub use github_ratelimit::{
    GitHubRateLimiter, PrimaryCallbackContext, PrimaryOption,
    PrimaryOverrides, PrimaryRateLimiter, RateLimitOption,
    RateLimitReachedError, RateLimitState, ResourceCategory,
    SecondaryCallbackContext, SecondaryOption, SecondaryOverrides,
    SecondaryRateLimiter,
};

/// Helper function to convert our error types to reqwest middleware errors
fn to_middleware_error<E: std::error::Error + Send + Sync + 'static>(
    error: E,
) -> Error {
    // Convert to anyhow::Error which is what reqwest-middleware expects
    Error::Middleware(anyhow::Error::new(error))
}

/// Wrapper for [`GitHubRateLimiter`]
#[derive(Debug)]
pub struct RateLimiter(pub GitHubRateLimiter);

/// Implements ['Middleware'] for reqwest
pub(crate) struct ReqwestMiddleware<'a> {
    pub req: Request,
    pub next: Next<'a>,
    pub extensions: &'a mut Extensions,
}

fn clone_req(request: &Request) -> std::result::Result<Request, Error> {
    match request.try_clone() {
        Some(r) => Ok(r),
        None => Err(to_middleware_error(BadRequest)),
    }
}

#[async_trait::async_trait]
impl Middleware for ReqwestMiddleware<'_> {
    fn url(&self) -> Result<Url> {
        Ok(self.req.url().clone())
    }

    fn method(&self) -> Result<Method> {
        Ok(self.req.method().clone())
    }

    fn primary_overrides(&self) -> Option<PrimaryOverrides> {
        self.extensions.get().cloned()
    }

    fn secondary_overrides(&self) -> Option<SecondaryOverrides> {
        self.extensions.get().cloned()
    }

    async fn remote_fetch(&mut self) -> Result<HttpResponse> {
        let copied_req = clone_req(&self.req)?;
        let res = self
            .next
            .clone()
            .run(copied_req, self.extensions)
            .await
            .map_err(BoxError::from)?;
        let url = res.url().clone();
        let status = res.status();
        let version = res.version();
        let headers = res.headers().clone();
        let body = res.bytes().await.map_err(BoxError::from)?.to_vec();
        Ok(HttpResponse { status, headers, body, url, version })
    }
}

// Converts an [`HttpResponse`] to a reqwest [`Response`]
fn convert_response(response: HttpResponse) -> Result<Response> {
    use reqwest::ResponseBuilderExt;

    let mut ret_res = http::Response::builder()
        .status(response.status)
        .url(response.url)
        .version(response.version)
        .body(response.body)?;
    *ret_res.headers_mut() = response.headers;
    Ok(Response::from(ret_res))
}

// Surfaces the typed rate limit error and passes transport errors through
// unchanged; anything else is reported as a rate limiter failure.
fn from_box_error(error: BoxError) -> Error {
    let error = match error.downcast::<RateLimitReachedError>() {
        Ok(reached) => return to_middleware_error(*reached),
        Err(error) => error,
    };
    match error.downcast::<Error>() {
        Ok(transport) => *transport,
        Err(other) => {
            to_middleware_error(ReqwestError::RateLimiter(other.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl reqwest_middleware::Middleware for RateLimiter {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> std::result::Result<Response, Error> {
        let mut middleware = ReqwestMiddleware { req, next, extensions };
        let res = self.0.run(&mut middleware).await.map_err(from_box_error)?;
        convert_response(res).map_err(from_box_error)
    }
}

/// Creates a client with the combined rate limiter installed, accepting
/// options for both layers.
pub fn client(
    options: impl IntoIterator<Item = RateLimitOption>,
) -> ClientWithMiddleware {
    ClientBuilder::new(reqwest::Client::new())
        .with(RateLimiter(GitHubRateLimiter::new(options)))
        .build()
}

#[cfg(test)]
mod test;
