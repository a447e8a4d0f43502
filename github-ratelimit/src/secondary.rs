//! Secondary (abuse/burst) rate limit handling.
//!
//! The secondary limiter serializes requests against a single cooldown
//! window: it waits out an active cooldown before forwarding, and when a
//! response reports a new limit it commits the cooldown, sleeps, and
//! retries. Issuing more requests during a secondary rate limit may cause a
//! ban from the server side, so the requests are held back, not just for
//! the sake of cpu/network utilization. Nonetheless, there is no way to
//! prevent subtle race conditions without completely serializing the
//! requests, so a few concurrent requests may slip through after a
//! cooldown response is received and before it is processed.

use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, SystemTime},
};

use tracing::debug;
use url::Url;

use crate::{
    detect::parse_secondary_reset, error::Result, response::HttpResponse,
    Middleware,
};

/// Context passed to secondary limit callbacks.
///
/// Callbacks run while the cooldown lock is held: they must be fast and
/// must not re-enter the limiter.
#[derive(Debug, Clone, Copy)]
pub struct SecondaryCallbackContext<'a> {
    /// The limiter that produced the event
    pub limiter: &'a SecondaryRateLimiter,
    /// Url of the originating request
    pub url: Option<&'a Url>,
    /// The response that reported the limit
    pub response: Option<&'a HttpResponse>,
    /// End of the cooldown window (or what it would have been, for
    /// exceeded events)
    pub reset_time: SystemTime,
    /// Accumulated smoothed sleep. Includes the upcoming sleep for
    /// limit-detected events; excludes it for exceeded events, since that
    /// sleep is not going to happen.
    pub total_sleep_time: Duration,
}

/// Called when a new cooldown is committed, before the sleep.
pub type OnLimitDetected =
    Arc<dyn Fn(&SecondaryCallbackContext<'_>) + Send + Sync>;

/// Called when a detected limit would exceed the single-sleep cap.
pub type OnSingleLimitExceeded =
    Arc<dyn Fn(&SecondaryCallbackContext<'_>) + Send + Sync>;

/// Called when a detected limit would exceed the total-sleep cap.
pub type OnTotalLimitExceeded =
    Arc<dyn Fn(&SecondaryCallbackContext<'_>) + Send + Sync>;

/// Configuration option for [`SecondaryRateLimiter`].
#[derive(Clone)]
pub enum SecondaryOption {
    /// Install a callback for newly committed cooldowns
    LimitDetectedCallback(OnLimitDetected),
    /// Cap the duration allowed for a single cooldown sleep
    SingleSleepLimit {
        /// Longest sleep the limiter may perform in one cooldown
        limit: Duration,
        /// Invoked when a detected limit is over the cap
        on_exceeded: Option<OnSingleLimitExceeded>,
    },
    /// Cap the accumulated duration allowed across all cooldown sleeps
    TotalSleepLimit {
        /// Longest accumulated sleep across the limiter's lifetime
        limit: Duration,
        /// Invoked when a detected limit would push the total over the cap
        on_exceeded: Option<OnTotalLimitExceeded>,
    },
}

impl SecondaryOption {
    /// Avoid sleeping during secondary rate limits, so the limit can be
    /// detected but handled out-of-band. Shorthand for a zero
    /// [`SecondaryOption::SingleSleepLimit`].
    #[must_use]
    pub fn no_sleep(on_exceeded: Option<OnSingleLimitExceeded>) -> Self {
        Self::SingleSleepLimit { limit: Duration::ZERO, on_exceeded }
    }
}

impl fmt::Debug for SecondaryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitDetectedCallback(_) => {
                f.pad("LimitDetectedCallback(Fn(&SecondaryCallbackContext))")
            }
            Self::SingleSleepLimit { limit, .. } => f
                .debug_struct("SingleSleepLimit")
                .field("limit", limit)
                .finish_non_exhaustive(),
            Self::TotalSleepLimit { limit, .. } => f
                .debug_struct("TotalSleepLimit")
                .field("limit", limit)
                .finish_non_exhaustive(),
        }
    }
}

/// Per-request overrides for the secondary layer.
///
/// Carried in the request extensions; the base configuration is shallow
/// copied and the overrides applied for that request only.
#[derive(Debug, Clone, Default)]
pub struct SecondaryOverrides(Vec<SecondaryOption>);

impl SecondaryOverrides {
    /// Collects options to apply on top of a limiter's base configuration.
    pub fn new(options: impl IntoIterator<Item = SecondaryOption>) -> Self {
        Self(options.into_iter().collect())
    }

    fn into_options(self) -> Vec<SecondaryOption> {
        self.0
    }
}

#[derive(Clone, Default)]
pub(crate) struct SecondaryConfig {
    single_sleep_limit: Option<Duration>,
    total_sleep_limit: Option<Duration>,
    on_limit_detected: Option<OnLimitDetected>,
    on_single_limit_exceeded: Option<OnSingleLimitExceeded>,
    on_total_limit_exceeded: Option<OnTotalLimitExceeded>,
}

impl SecondaryConfig {
    fn new(options: Vec<SecondaryOption>) -> Self {
        let mut config = Self::default();
        for option in options {
            config.apply(option);
        }
        config
    }

    fn apply(&mut self, option: SecondaryOption) {
        match option {
            SecondaryOption::LimitDetectedCallback(callback) => {
                self.on_limit_detected = Some(callback);
            }
            SecondaryOption::SingleSleepLimit { limit, on_exceeded } => {
                self.single_sleep_limit = Some(limit);
                self.on_single_limit_exceeded = on_exceeded;
            }
            SecondaryOption::TotalSleepLimit { limit, on_exceeded } => {
                self.total_sleep_limit = Some(limit);
                self.on_total_limit_exceeded = on_exceeded;
            }
        }
    }

    fn above_single_sleep_limit(&self, sleep: Duration) -> bool {
        self.single_sleep_limit.is_some_and(|limit| sleep > limit)
    }

    fn above_total_sleep_limit(
        &self,
        smoothed_sleep: Duration,
        total_sleep_time: Duration,
    ) -> bool {
        self.total_sleep_limit
            .is_some_and(|limit| total_sleep_time + smoothed_sleep > limit)
    }
}

impl fmt::Debug for SecondaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecondaryConfig")
            .field("single_sleep_limit", &self.single_sleep_limit)
            .field("total_sleep_limit", &self.total_sleep_limit)
            .finish_non_exhaustive()
    }
}

// Rounds a non-zero sleep duration up to whole seconds. The server only
// uses seconds to indicate the time to sleep, but the wall-clock sleep is
// shorter because internal processing delay has consumed part of the
// window; rounding up restores the advertised value for accounting.
pub(crate) fn smooth_sleep(sleep: Duration) -> Duration {
    if sleep.is_zero() || sleep.subsec_nanos() == 0 {
        sleep
    } else {
        Duration::from_secs(sleep.as_secs() + 1)
    }
}

#[derive(Debug, Default)]
struct CooldownState {
    reset_time: Option<SystemTime>,
    total_sleep_time: Duration,
}

fn remaining_cooldown(state: &CooldownState) -> Duration {
    match state.reset_time {
        None => Duration::ZERO,
        Some(reset_time) => reset_time
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    }
}

fn trigger(
    callback: Option<&OnLimitDetected>,
    context: &SecondaryCallbackContext<'_>,
) {
    if let Some(callback) = callback {
        callback(context);
    }
}

/// Interceptor handling the secondary rate limit by waiting for an active
/// cooldown to finish before issuing new requests.
#[derive(Debug)]
pub struct SecondaryRateLimiter {
    state: RwLock<CooldownState>,
    config: SecondaryConfig,
}

impl SecondaryRateLimiter {
    /// Creates a limiter from the given options.
    pub fn new(options: impl IntoIterator<Item = SecondaryOption>) -> Self {
        Self {
            state: RwLock::new(CooldownState::default()),
            config: SecondaryConfig::new(options.into_iter().collect()),
        }
    }

    /// Accumulated smoothed sleep across the limiter's lifetime.
    #[must_use]
    pub fn total_sleep_time(&self) -> Duration {
        self.read_state().total_sleep_time
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CooldownState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CooldownState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn request_config(
        &self,
        overrides: Option<SecondaryOverrides>,
    ) -> Cow<'_, SecondaryConfig> {
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

    /// Runs a request, waiting out secondary rate limit cooldowns.
    ///
    /// When a response reports a new limit the cooldown is committed and
    /// the request retried; the retry re-encounters the cooldown and sleeps
    /// until it ends. When a configured sleep cap forbids waiting, the
    /// triggering response is returned verbatim instead. The limiter never
    /// fabricates an error from the limit itself, and transport errors pass
    /// through unchanged.
    pub async fn run<M: Middleware>(
        &self,
        middleware: &mut M,
    ) -> Result<HttpResponse> {
        loop {
            self.wait_for_cooldown().await;

            let response = middleware.remote_fetch().await?;

            let Some(reset_time) = parse_secondary_reset(&response) else {
                return Ok(response);
            };

            let url = middleware.url()?;
            let overrides = middleware.secondary_overrides();
            if !self.update_cooldown(reset_time, overrides, &url, &response) {
                return Ok(response);
            }
        }
    }

    // Waits for the cooldown to finish if a secondary rate limit is active.
    // Dropping the future abandons the sleep (cooperative cancellation).
    async fn wait_for_cooldown(&self) {
        let pause = remaining_cooldown(&self.read_state());
        if !pause.is_zero() {
            debug!(?pause, "waiting out secondary rate limit cooldown");
            tokio::time::sleep(pause).await;
        }
    }

    // Updates the active cooldown and fires callbacks as needed. The
    // cooldown is not updated if one is already active. Never sleeps,
    // because the retry handles sleeping anyway. Returns whether or not to
    // retry the request.
    fn update_cooldown(
        &self,
        reset_time: SystemTime,
        overrides: Option<SecondaryOverrides>,
        url: &Url,
        response: &HttpResponse,
    ) -> bool {
        // quick check without the lock: maybe the limit just passed
        if SystemTime::now() >= reset_time {
            return true;
        }

        let mut state = self.write_state();

        // check before update if there is already an active cooldown
        if !remaining_cooldown(&state).is_zero() {
            return true;
        }

        // the limit may have passed while we waited for the lock
        let sleep = match reset_time.duration_since(SystemTime::now()) {
            Ok(sleep) if !sleep.is_zero() => sleep,
            _ => return true,
        };

        let config = self.request_config(overrides);

        // do not sleep in case it is above the single sleep limit
        if config.above_single_sleep_limit(sleep) {
            let context = SecondaryCallbackContext {
                limiter: self,
                url: Some(url),
                response: Some(response),
                reset_time,
                total_sleep_time: state.total_sleep_time,
            };
            trigger(config.on_single_limit_exceeded.as_ref(), &context);
            return false;
        }

        // do not sleep in case it would push past the total sleep limit
        let smoothed_sleep = smooth_sleep(sleep);
        if config.above_total_sleep_limit(smoothed_sleep, state.total_sleep_time)
        {
            let context = SecondaryCallbackContext {
                limiter: self,
                url: Some(url),
                response: Some(response),
                reset_time,
                total_sleep_time: state.total_sleep_time,
            };
            trigger(config.on_total_limit_exceeded.as_ref(), &context);
            return false;
        }

        // a legitimate new cooldown
        state.reset_time = Some(reset_time);
        state.total_sleep_time += smoothed_sleep;
        debug!(?sleep, "secondary rate limit detected");
        let context = SecondaryCallbackContext {
            limiter: self,
            url: Some(url),
            response: Some(response),
            reset_time,
            total_sleep_time: state.total_sleep_time,
        };
        trigger(config.on_limit_detected.as_ref(), &context);

        true
    }
}
