use super::model::HitThrottle;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};

/// Fixed-window hit limiter.
///
/// The first `limit` hits of a window pass; later hits are suppressed until
/// more than one step has elapsed since the window opened, at which point the
/// hit passes and opens a new window. Counters are independent atomics, so
/// concurrent hits near a window boundary may let one extra hit through.
#[derive(Debug)]
pub struct Throttle {
    limit: i32,
    step_millis: i64,
    window_start: AtomicI64,
    window_hits: AtomicI32,
    passed: AtomicU64,
    limited: AtomicU64,
}

impl Throttle {
    /// `None` for a disabled throttle (`limit == -1`).
    pub fn new(config: HitThrottle) -> Option<Self> {
        if config.limit < 0 {
            return None;
        }
        Some(Throttle {
            limit: config.limit,
            step_millis: config.step.millis(),
            window_start: AtomicI64::new(-1),
            window_hits: AtomicI32::new(0),
            passed: AtomicU64::new(0),
            limited: AtomicU64::new(0),
        })
    }

    pub fn is_rate_limited(&self) -> bool {
        self.is_rate_limited_at(super::now_millis())
    }

    pub fn is_rate_limited_at(&self, now_millis: i64) -> bool {
        let previous = self
            .window_hits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n);
        if previous < self.limit {
            let _ = self.window_start.compare_exchange(-1, now_millis, Ordering::AcqRel, Ordering::Acquire);
            self.passed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if now_millis - self.window_start.load(Ordering::Acquire) > self.step_millis {
            self.window_hits.store(1, Ordering::Release);
            self.window_start.store(now_millis, Ordering::Release);
            self.passed.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            self.limited.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    pub fn total_passed(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    pub fn total_limited(&self) -> u64 {
        self.limited.load(Ordering::Relaxed)
    }
}
