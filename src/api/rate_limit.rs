//! Fixed-window request throttles
//!
//! A window opens on the first request for a key and lasts `window` from
//! there. Limiters hold no clock of their own: callers pass `now`, which
//! keeps them deterministic under test and lets one sweep task expire
//! stale windows for every limiter at once.

use crate::config::LimitConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    count: u32,
}

/// Outcome of a single throttle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Time until the current window closes
    pub resets_in: Duration,
}

/// Per-key fixed-window counter
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: LimitConfig,
    windows: HashMap<String, Window>,
}

impl FixedWindowLimiter {
    pub fn new(limit: LimitConfig) -> Self {
        Self {
            limit,
            windows: HashMap::new(),
        }
    }

    pub fn limit(&self) -> LimitConfig {
        self.limit
    }

    /// Count a request for `key` at `now`
    ///
    /// Denied requests are not counted against the window.
    pub fn check_at(&mut self, key: &str, now: Instant) -> RateDecision {
        let limit = self.limit;
        let window = self
            .windows
            .entry(key.to_string())
            .or_insert(Window { opened: now, count: 0 });

        if now.saturating_duration_since(window.opened) >= limit.window {
            *window = Window { opened: now, count: 0 };
        }

        let resets_in = limit
            .window
            .saturating_sub(now.saturating_duration_since(window.opened));

        if window.count >= limit.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
                resets_in,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            remaining: limit.max_requests - window.count,
            resets_in,
        }
    }

    /// Drop every window that has closed by `now`; returns how many went
    pub fn sweep(&mut self, now: Instant) -> usize {
        let window = self.limit.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.opened) < window);
        before - self.windows.len()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// The throttles owned by the application state
#[derive(Debug)]
pub struct RateLimiters {
    /// Uploads per client address
    pub upload: FixedWindowLimiter,
    /// Enhancements per page session
    pub enhance: FixedWindowLimiter,
}

impl RateLimiters {
    pub fn new(upload: LimitConfig, enhance: LimitConfig) -> Self {
        Self {
            upload: FixedWindowLimiter::new(upload),
            enhance: FixedWindowLimiter::new(enhance),
        }
    }

    /// Sweep both limiters
    pub fn sweep(&mut self, now: Instant) -> usize {
        let removed = self.upload.sweep(now) + self.enhance.sweep(now);
        if removed > 0 {
            debug!("Swept {} expired rate-limit windows", removed);
        }
        removed
    }
}
