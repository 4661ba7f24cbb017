// =============================================================================
// Rate Limiter — per-client fixed-window counter for expensive routes
// =============================================================================
//
// Guards the backtest and report endpoints, which each fan out into several
// upstream calls. Health checks and streaming connects are never limited.
// The window is fixed, not sliding: the first request after a window elapses
// starts a fresh window with a count of 1.
// =============================================================================

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Seconds until the current window ends; the retry hint on rejection.
    pub retry_after_secs: u64,
}

/// Fixed-window request counter keyed by client IP.
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, RateWindow>>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_requests,
        }
    }

    /// Count one request from `client` and decide whether it may proceed.
    pub fn check(&self, client: IpAddr) -> Decision {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        let entry = windows.entry(client).or_insert(RateWindow {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count += 1;

        let window_ends = entry.window_start + self.window;
        let retry_after_secs = window_ends.saturating_duration_since(now).as_secs().max(1);

        if entry.count > self.max_requests {
            warn!(
                client = %client,
                count = entry.count,
                limit = self.max_requests,
                "rate limit exceeded"
            );
            Decision {
                allowed: false,
                retry_after_secs,
            }
        } else {
            Decision {
                allowed: true,
                retry_after_secs,
            }
        }
    }
}
