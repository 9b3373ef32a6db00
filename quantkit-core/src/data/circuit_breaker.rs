//! Source-wide rate-limit breaker.
//!
//! Yahoo throttles per client IP, so one 429 usually means every following
//! request will fail too. The breaker is shared by all workers of a batch:
//! an HTTP 403 opens it at once, repeated 429s open it after a threshold, and
//! while it is open the source answers `RateLimited` without a request.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// State of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are allowed.
    Closed,
    /// Tripped; requests are refused until the cooldown expires.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_throttles: u32,
}

/// Breaker shared between all requests made through one source.
#[derive(Debug)]
pub struct RateLimitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    threshold: u32,
}

impl RateLimitBreaker {
    pub fn new(cooldown: Duration, threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_throttles: 0,
            }),
            cooldown,
            threshold: threshold.max(1),
        }
    }

    /// 30-minute cooldown, opens after 3 consecutive throttled responses.
    pub fn default_source() -> Self {
        Self::new(Duration::from_secs(30 * 60), 3)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded data is two plain fields; a panic elsewhere cannot leave
        // it half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check if requests are currently allowed. Closes an expired breaker.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_throttles = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// A request went through; reset the throttle streak.
    pub fn record_success(&self) {
        self.lock().consecutive_throttles = 0;
    }

    /// A throttled response (HTTP 429). Opens the breaker at the threshold.
    pub fn record_throttle(&self) {
        let mut inner = self.lock();
        inner.consecutive_throttles += 1;
        if inner.consecutive_throttles >= self.threshold {
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    /// Open immediately (HTTP 403: the client has been blocked).
    pub fn trip(&self) {
        self.lock().state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Remaining cooldown (zero when closed).
    pub fn remaining_cooldown(&self) -> Duration {
        match self.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}
