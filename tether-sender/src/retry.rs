//! Retry policies for `FLOOD_WAIT` and transient network errors.
//!
//! The sender never retries on its own; callers opt in through
//! [`crate::Sender::invoke_with_retry`].

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::InvocationError;

/// Decides whether a failed call should be attempted again.
pub trait RetryPolicy: Send + Sync + 'static {
    /// `Continue(delay)` to sleep and retry, `Break(())` to give up.
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`RetryPolicy::should_retry`] on each failure.
#[derive(Debug)]
pub struct RetryContext {
    pub fail_count:   NonZeroU32,
    pub slept_so_far: Duration,
    pub error:        InvocationError,
}

/// Never retry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetries;

impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Sleep through short FLOOD_WAITs and retry once after a network error.
#[derive(Clone, Debug)]
pub struct AutoSleep {
    /// Longest flood wait worth sleeping through.
    pub threshold:             Duration,
    /// Delay before retrying a network failure, or `None` to give up.
    pub io_errors_as_flood_of: Option<Duration>,
}

impl Default for AutoSleep {
    fn default() -> Self {
        Self {
            threshold:             Duration::from_secs(60),
            io_errors_as_flood_of: Some(Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy for AutoSleep {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        if let Some(secs) = ctx.error.flood_wait_seconds() {
            if ctx.fail_count.get() == 1 && secs <= self.threshold.as_secs() {
                tracing::info!("FLOOD_WAIT_{secs}: sleeping before retry");
                return ControlFlow::Continue(Duration::from_secs(secs));
            }
        }
        if ctx.error.is_network() && ctx.fail_count.get() == 1 {
            if let Some(d) = self.io_errors_as_flood_of {
                tracing::info!("network error: sleeping {d:?} before retry");
                return ControlFlow::Continue(d);
            }
        }
        ControlFlow::Break(())
    }
}
