//! Fixed-window rate limiting keyed by caller-supplied strings.
//!
//! The window map is owned by the [`FixedWindow`] value; handlers receive it
//! through shared state rather than a process-wide global, so a multi-instance
//! deployment can swap in a shared store without touching call sites.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Per-route limit: at most `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RoutePolicy {
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Request may proceed; `remaining` requests left in this window.
    Allowed { remaining: u32 },
    /// Request rejected; the window resets after `retry_after`.
    Denied { retry_after: Duration },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

struct Window {
    count: u32,
    expires_at: Instant,
}

/// In-memory fixed-window limiter.
///
/// Expired windows reset on next access. Once the map passes a size
/// threshold, expired entries are swept on the way in so abandoned keys do
/// not accumulate forever.
#[derive(Default)]
pub struct FixedWindow {
    windows: Mutex<HashMap<String, Window>>,
}

const SWEEP_THRESHOLD: usize = 1024;

impl FixedWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against `key` under `policy`.
    pub fn check(&self, key: &str, policy: &RoutePolicy) -> Decision {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| w.expires_at > now);
        }

        match windows.get_mut(key) {
            Some(window) if window.expires_at > now => {
                if window.count < policy.limit {
                    window.count += 1;
                    Decision::Allowed {
                        remaining: policy.limit.saturating_sub(window.count),
                    }
                } else {
                    Decision::Denied {
                        retry_after: window.expires_at.saturating_duration_since(now),
                    }
                }
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    Window {
                        count: 1,
                        expires_at: now + policy.window,
                    },
                );
                Decision::Allowed {
                    remaining: policy.limit.saturating_sub(1),
                }
            }
        }
    }
}
