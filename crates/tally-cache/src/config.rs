//! Cache tuning.

use std::time::Duration;

/// Timing knobs for [`DataCache`](crate::DataCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a fetched value counts as fresh.
    pub ttl: Duration,
    /// How long an unconfirmed optimistic count overrides server data.
    pub pending_window: Duration,
}

impl CacheConfig {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_PENDING_WINDOW: Duration = Duration::from_secs(3);

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_pending_window(mut self, window: Duration) -> Self {
        self.pending_window = window;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Self::DEFAULT_TTL,
            pending_window: Self::DEFAULT_PENDING_WINDOW,
        }
    }
}
