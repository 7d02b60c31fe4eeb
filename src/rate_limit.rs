//! Per-principal request rate limiting.
//!
//! Token bucket of 100 requests per 60 seconds keyed by principal id.
//! Exhaustion surfaces as [`PlatformError::RateLimited`], which the
//! transport maps to HTTP 429.

use crate::domain::errors::PlatformError;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 100;

pub struct RateGate {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate").finish_non_exhaustive()
    }
}

impl RateGate {
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).expect("requests per minute must be non-zero"),
        );
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Spend one request slot for `principal_id`.
    pub fn check(&self, principal_id: &str) -> Result<(), PlatformError> {
        self.limiter
            .check_key(&principal_id.to_string())
            .map_err(|_| PlatformError::RateLimited)
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE)
    }
}
