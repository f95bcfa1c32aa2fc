//! Minimum-spacing rate limiter for a single data source

use crate::asn::ResolveError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Enforces a minimum interval between one adapter's outbound calls
///
/// Each adapter owns its own limiter; limiters are never shared between
/// adapters. The first call goes through immediately.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given minimum spacing
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }

    /// The configured minimum spacing
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the interval has elapsed since the previous call, then
    /// record the new call time
    pub async fn wait(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            tokio::time::sleep_until(previous + self.interval).await;
        }
        *last_call = Some(Instant::now());
    }

    /// Like [`RateLimiter::wait`], but gives up when `cancel` fires
    ///
    /// A cancelled wait does not record a call time.
    pub async fn wait_or_cancel(&self, cancel: &CancellationToken) -> Result<(), ResolveError> {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            tokio::select! {
                _ = tokio::time::sleep_until(previous + self.interval) => {}
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            }
        } else if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        *last_call = Some(Instant::now());
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(crate::config::timing::rate_limit())
    }
}
