// =============================================================================
// Rate Limiter — dual sliding-window token buckets
// =============================================================================
//
// Every external request must clear two windows at once: a per-second bucket
// (capacity S) and a per-minute bucket (capacity M). Grants are timestamped
// into two deques; on each acquire, stamps older than the window are dropped
// and, if either deque is full, the earliest wake time is the later of
// `(oldest_second + 1s)` and `(oldest_minute + 60s)` — whichever constrains.
//
// `acquire()` sleeps outside the lock, so concurrent workers only contend for
// the few microseconds of deque bookkeeping.
// =============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

const SECOND_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

struct Inner {
    second_stamps: VecDeque<Instant>,
    minute_stamps: VecDeque<Instant>,
}

/// Serialisable view of the limiter's occupancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSnapshot {
    pub used_per_second: usize,
    pub used_per_minute: usize,
    pub capacity_per_second: usize,
    pub capacity_per_minute: usize,
}

/// Dual-bucket sliding-window rate limiter.
pub struct RateLimiter {
    inner: Mutex<Inner>,
    per_second: usize,
    per_minute: usize,
}

impl RateLimiter {
    pub fn new(per_second: usize, per_minute: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                second_stamps: VecDeque::with_capacity(per_second + 1),
                minute_stamps: VecDeque::with_capacity(per_minute + 1),
            }),
            per_second: per_second.max(1),
            per_minute: per_minute.max(1),
        }
    }

    /// Attempt to take a token at `now`.
    ///
    /// On success both deques are stamped. On failure returns the sleep
    /// duration after which a token is guaranteed available (absent other
    /// contenders).
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut inner = self.inner.lock();

        while let Some(&front) = inner.second_stamps.front() {
            if now.duration_since(front) >= SECOND_WINDOW {
                inner.second_stamps.pop_front();
            } else {
                break;
            }
        }
        while let Some(&front) = inner.minute_stamps.front() {
            if now.duration_since(front) >= MINUTE_WINDOW {
                inner.minute_stamps.pop_front();
            } else {
                break;
            }
        }

        let second_full = inner.second_stamps.len() >= self.per_second;
        let minute_full = inner.minute_stamps.len() >= self.per_minute;

        if !second_full && !minute_full {
            inner.second_stamps.push_back(now);
            inner.minute_stamps.push_back(now);
            return Ok(());
        }

        // Earliest instant at which the constraining window frees a slot.
        let mut wait = Duration::ZERO;
        if second_full {
            if let Some(&oldest) = inner.second_stamps.front() {
                wait = wait.max(SECOND_WINDOW.saturating_sub(now.duration_since(oldest)));
            }
        }
        if minute_full {
            if let Some(&oldest) = inner.minute_stamps.front() {
                wait = wait.max(MINUTE_WINDOW.saturating_sub(now.duration_since(oldest)));
            }
        }
        // Never return a zero hint while a bucket is full; re-check shortly.
        Err(wait.max(Duration::from_millis(10)))
    }

    /// Block (async) until a token is available.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    trace!(wait_ms = wait.as_millis() as u64, "rate limiter backoff");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let inner = self.inner.lock();
        RateLimiterSnapshot {
            used_per_second: inner.second_stamps.len(),
            used_per_minute: inner.minute_stamps.len(),
            capacity_per_second: self.per_second,
            capacity_per_minute: self.per_minute,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("RateLimiter")
            .field("used_per_second", &snap.used_per_second)
            .field("used_per_minute", &snap.used_per_minute)
            .field("capacity_per_second", &self.per_second)
            .field("capacity_per_minute", &self.per_minute)
            .finish()
    }
}
