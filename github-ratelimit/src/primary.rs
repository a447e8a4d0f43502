//! Primary (per-category quota) rate limit handling.
//!
//! The primary limiter never sleeps and never retries: while a limit is
//! active for a request's category it short-circuits with a synthesized
//! failure, otherwise it forwards the request and records any limit the
//! response reports.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use tracing::{debug, warn};
use url::Url;

use crate::{
    category::ResourceCategory,
    detect::parse_primary_reset,
    error::{RateLimitReachedError, Result},
    response::{HttpResponse, XRATELIMIT_RESOURCE},
    Middleware,
};

/// Context passed to primary limit callbacks.
///
/// Fields may be empty depending on the specific callback: limit reset
/// events are driven by a timer, with no request in flight.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryCallbackContext<'a> {
    /// The limiter that produced the event; empty for timer-driven resets
    pub limiter: Option<&'a PrimaryRateLimiter>,
    /// Url of the originating request, when one is in flight
    pub url: Option<&'a Url>,
    /// The triggering response; synthesized for prevented requests
    pub response: Option<&'a HttpResponse>,
    /// The category the event applies to
    pub category: ResourceCategory,
    /// When the limit lifts
    pub reset_time: Option<SystemTime>,
}

/// Called when a new rate limit is detected.
pub type OnLimitReached =
    Arc<dyn Fn(&PrimaryCallbackContext<'_>) + Send + Sync>;

/// Called when an existing rate limit is detected, such that the current
/// request is not sent.
pub type OnRequestPrevented =
    Arc<dyn Fn(&PrimaryCallbackContext<'_>) + Send + Sync>;

/// Called when a rate limit reset time is reached, which means that the
/// category is available for use again.
pub type OnLimitReset =
    Arc<dyn Fn(&PrimaryCallbackContext<'_>) + Send + Sync>;

/// Called when a response advertises a category outside the enumeration,
/// which means that the rate limiter does not handle it.
pub type OnUnknownCategory =
    Arc<dyn Fn(&PrimaryCallbackContext<'_>) + Send + Sync>;

const NO_LIMIT: i64 = 0;

fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(NO_LIMIT)
}

fn epoch_time(seconds: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(seconds.max(0) as u64)
}

/// Shared per-category reset time slots.
///
/// Every slot is allocated at construction and the map topology never
/// changes afterwards, which permits lock-free reads and writes on the
/// values. A value of zero means no active limit. The state is intended to
/// be shared across limiters bound to the same logical principal, via
/// [`PrimaryOption::SharedState`].
#[derive(Debug)]
pub struct RateLimitState {
    reset_times: HashMap<ResourceCategory, AtomicI64>,
}

impl RateLimitState {
    /// Creates state with an empty slot for every category.
    #[must_use]
    pub fn new() -> Self {
        let reset_times = ResourceCategory::all()
            .into_iter()
            .map(|category| (category, AtomicI64::new(NO_LIMIT)))
            .collect();
        Self { reset_times }
    }

    /// Returns the reset instant for the category, if a limit is active.
    #[must_use]
    pub fn reset_time(&self, category: ResourceCategory) -> Option<SystemTime> {
        let Some(slot) = self.reset_times.get(&category) else {
            warn!(
                category = %category,
                "unexpected category detected, please open an issue"
            );
            return None;
        };
        match slot.load(Ordering::Acquire) {
            NO_LIMIT => None,
            seconds => Some(epoch_time(seconds)),
        }
    }

    pub(crate) fn record(&self, category: ResourceCategory, reset_seconds: i64) {
        if let Some(slot) = self.reset_times.get(&category) {
            slot.store(reset_seconds, Ordering::Release);
        }
    }

    // Clears the slot only while it still holds `reset_seconds`, so a timer
    // whose instant was superseded by a newer limit is a no-op.
    pub(crate) fn clear_if(
        &self,
        category: ResourceCategory,
        reset_seconds: i64,
    ) -> bool {
        let Some(slot) = self.reset_times.get(&category) else {
            return false;
        };
        slot.compare_exchange(
            reset_seconds,
            NO_LIMIT,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration option for [`PrimaryRateLimiter`].
#[derive(Clone)]
pub enum PrimaryOption {
    /// Install a callback for newly detected limits
    LimitDetectedCallback(OnLimitReached),
    /// Install a callback for requests short-circuited by an active limit.
    /// Not called when a limit is first detected.
    RequestPreventedCallback(OnRequestPrevented),
    /// Install a callback for ongoing limits that are no longer active
    LimitResetCallback(OnLimitReset),
    /// Install a callback for responses advertising an unrecognized category
    UnknownCategoryCallback(OnUnknownCategory),
    /// Share reset time slots with other limiters, e.g.
    /// `PrimaryRateLimiter::new([PrimaryOption::SharedState(other.state())])`
    SharedState(Arc<RateLimitState>),
    /// Forward requests even while a limit is active. Callbacks still fire.
    /// Useful for testing, out-of-band token switching, etc.
    BypassLimit,
    /// Sleep until the reset instant whenever a new limit is detected.
    /// Useful for testing, long-running offline applications, etc.
    SleepUntilReset,
}

impl fmt::Debug for PrimaryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitDetectedCallback(_) => {
                f.pad("LimitDetectedCallback(Fn(&PrimaryCallbackContext))")
            }
            Self::RequestPreventedCallback(_) => {
                f.pad("RequestPreventedCallback(Fn(&PrimaryCallbackContext))")
            }
            Self::LimitResetCallback(_) => {
                f.pad("LimitResetCallback(Fn(&PrimaryCallbackContext))")
            }
            Self::UnknownCategoryCallback(_) => {
                f.pad("UnknownCategoryCallback(Fn(&PrimaryCallbackContext))")
            }
            Self::SharedState(state) => {
                f.debug_tuple("SharedState").field(state).finish()
            }
            Self::BypassLimit => f.pad("BypassLimit"),
            Self::SleepUntilReset => f.pad("SleepUntilReset"),
        }
    }
}

/// Per-request overrides for the primary layer.
///
/// Carried in the request extensions; the base configuration is shallow
/// copied and the overrides applied for that request only.
#[derive(Debug, Clone, Default)]
pub struct PrimaryOverrides(Vec<PrimaryOption>);

impl PrimaryOverrides {
    /// Collects options to apply on top of a limiter's base configuration.
    pub fn new(options: impl IntoIterator<Item = PrimaryOption>) -> Self {
        Self(options.into_iter().collect())
    }

    fn into_options(self) -> Vec<PrimaryOption> {
        self.0
    }
}

// Generated from the options; holds the state in order to enable sharing.
#[derive(Clone)]
pub(crate) struct PrimaryConfig {
    state: Arc<RateLimitState>,
    bypass_limit: bool,
    sleep_until_reset: bool,
    on_limit_reached: Option<OnLimitReached>,
    on_request_prevented: Option<OnRequestPrevented>,
    on_limit_reset: Option<OnLimitReset>,
    on_unknown_category: Option<OnUnknownCategory>,
}

impl PrimaryConfig {
    fn new(options: Vec<PrimaryOption>) -> Self {
        let mut config = Self {
            state: Arc::new(RateLimitState::new()),
            bypass_limit: false,
            sleep_until_reset: false,
            on_limit_reached: None,
            on_request_prevented: None,
            on_limit_reset: None,
            on_unknown_category: None,
        };
        for option in options {
            config.apply(option);
        }
        config
    }

    fn apply(&mut self, option: PrimaryOption) {
        match option {
            PrimaryOption::LimitDetectedCallback(callback) => {
                self.on_limit_reached = Some(callback);
            }
            PrimaryOption::RequestPreventedCallback(callback) => {
                self.on_request_prevented = Some(callback);
            }
            PrimaryOption::LimitResetCallback(callback) => {
                self.on_limit_reset = Some(callback);
            }
            PrimaryOption::UnknownCategoryCallback(callback) => {
                self.on_unknown_category = Some(callback);
            }
            PrimaryOption::SharedState(state) => self.state = state,
            PrimaryOption::BypassLimit => self.bypass_limit = true,
            PrimaryOption::SleepUntilReset => self.sleep_until_reset = true,
        }
    }
}

impl fmt::Debug for PrimaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryConfig")
            .field("state", &self.state)
            .field("bypass_limit", &self.bypass_limit)
            .field("sleep_until_reset", &self.sleep_until_reset)
            .finish_non_exhaustive()
    }
}

fn trigger(
    callback: Option<&OnLimitReached>,
    context: &PrimaryCallbackContext<'_>,
) {
    if let Some(callback) = callback {
        callback(context);
    }
}

/// Interceptor enforcing the primary rate limit.
///
/// Reset timers run as background tasks, so the limiter must be used from
/// within a tokio runtime.
#[derive(Debug)]
pub struct PrimaryRateLimiter {
    config: PrimaryConfig,
}

impl PrimaryRateLimiter {
    /// Creates a limiter from the given options.
    pub fn new(options: impl IntoIterator<Item = PrimaryOption>) -> Self {
        Self { config: PrimaryConfig::new(options.into_iter().collect()) }
    }

    /// The reset time state, for sharing the primary rate limit knowledge
    /// when multiple limiters are bound to the same logical principal.
    #[must_use]
    pub fn state(&self) -> Arc<RateLimitState> {
        self.config.state.clone()
    }

    pub(crate) fn request_config(
        &self,
        overrides: Option<PrimaryOverrides>,
    ) -> Cow<'_, PrimaryConfig> {
        match overrides {
            // no config override - use the base config (zero-copy)
            None => Cow::Borrowed(&self.config),
            Some(overrides) => {
                let mut config = self.config.clone();
                for option in overrides.into_options() {
                    config.apply(option);
                }
                Cow::Owned(config)
            }
        }
    }

    /// Runs a request through the primary gate.
    ///
    /// While a limit is active for the request's category this returns a
    /// [`RateLimitReachedError`] without issuing a network request (unless
    /// [`PrimaryOption::BypassLimit`] is set). A response that reports an
    /// exhausted quota records the reset instant, arms the reset timer, and
    /// is likewise converted into the typed error.
    pub async fn run<M: Middleware>(
        &self,
        middleware: &mut M,
    ) -> Result<HttpResponse> {
        let config = self.request_config(middleware.primary_overrides());
        let url = middleware.url()?;
        let method = middleware.method()?;
        let category = ResourceCategory::of_request(&method, url.path());

        if let Some(reset_time) = config.state.reset_time(category) {
            let response = HttpResponse::rate_limited(url.clone(), category);
            let context = PrimaryCallbackContext {
                limiter: Some(self),
                url: Some(&url),
                response: Some(&response),
                category,
                reset_time: Some(reset_time),
            };
            trigger(config.on_request_prevented.as_ref(), &context);
            if !config.bypass_limit {
                return Err(Box::new(RateLimitReachedError {
                    url,
                    category,
                    reset_time: Some(reset_time),
                    response,
                }));
            }
        }

        let response = middleware.remote_fetch().await?;
        self.process_response(&config, url, category, response).await
    }

    async fn process_response(
        &self,
        config: &PrimaryConfig,
        url: Url,
        request_category: ResourceCategory,
        response: HttpResponse,
    ) -> Result<HttpResponse> {
        let Some(reset_time) = parse_primary_reset(&response) else {
            // nothing to update on a successful request
            return Ok(response);
        };

        // The response-advertised category wins for state updates; fall
        // back to the request category when the header is absent.
        // TODO detect request/response category mismatch (and do what?)
        let category = match response.header_str(XRATELIMIT_RESOURCE) {
            None | Some("") => request_category,
            Some(symbol) => ResourceCategory::parse(symbol),
        };

        let context = PrimaryCallbackContext {
            limiter: Some(self),
            url: Some(&url),
            response: Some(&response),
            category,
            reset_time: Some(reset_time),
        };

        if category == ResourceCategory::Unknown {
            warn!(
                resource = response.header_str(XRATELIMIT_RESOURCE),
                "unexpected category detected, please open an issue"
            );
            trigger(config.on_unknown_category.as_ref(), &context);
            return Ok(response);
        }

        let reset_seconds = epoch_seconds(reset_time);
        config.state.record(category, reset_seconds);
        debug!(category = %category, "primary rate limit detected");
        self.spawn_reset_timer(config, category, reset_seconds, reset_time);
        trigger(config.on_limit_reached.as_ref(), &context);

        if config.sleep_until_reset {
            let pause = reset_time
                .duration_since(SystemTime::now())
                .unwrap_or_default();
            tokio::time::sleep(pause).await;
        }

        Err(Box::new(RateLimitReachedError {
            url,
            category,
            reset_time: Some(reset_time),
            response,
        }))
    }

    fn spawn_reset_timer(
        &self,
        config: &PrimaryConfig,
        category: ResourceCategory,
        reset_seconds: i64,
        reset_time: SystemTime,
    ) {
        let state = config.state.clone();
        let on_limit_reset = config.on_limit_reset.clone();
        tokio::spawn(async move {
            let pause = reset_time
                .duration_since(SystemTime::now())
                .unwrap_or_default();
            tokio::time::sleep(pause).await;
            if !state.clear_if(category, reset_seconds) {
                // superseded by a newer limit; its own timer is armed
                return;
            }
            debug!(category = %category, "primary rate limit reset");
            let context = PrimaryCallbackContext {
                limiter: None,
                url: None,
                response: None,
                category,
                reset_time: Some(reset_time),
            };
            trigger(on_limit_reset.as_ref(), &context);
        });
    }
}
