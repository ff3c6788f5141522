//! Admission gate applied before any payload work.
//!
//! The gate decides whether an authenticated uploader may submit at all.
//! It runs before decompression so that rejected uploaders cost nothing
//! beyond reading the request.

use dashmap::DashMap;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
};
use logward_core::OwnerId;
use logward_core::config::AdmissionConfig;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether an uploader may submit right now.
pub trait AdmissionGate: Send + Sync {
    /// Returns `false` to reject the upload with `admission_denied`.
    fn admit(&self, owner: &OwnerId) -> bool;

    /// Drop state for uploaders that have been idle. Returns entries removed.
    fn cleanup(&self) -> usize {
        0
    }
}

/// Gate that admits every uploader.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl AdmissionGate for OpenGate {
    fn admit(&self, _owner: &OwnerId) -> bool {
        true
    }
}

/// Keyed rate limiter (per uploader).
type KeyedLimiter =
    RateLimiter<String, DashMap<String, InMemoryState>, DefaultClock, NoOpMiddleware>;

/// Per-uploader token bucket quota.
pub struct QuotaGate {
    limiter: KeyedLimiter,
}

impl QuotaGate {
    /// Create a quota gate from configuration.
    pub fn new(config: &AdmissionConfig) -> Self {
        let per_minute = NonZeroU32::new(config.uploads_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: RateLimiter::dashmap(quota),
        }
    }

    /// Number of uploaders currently tracked.
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

impl AdmissionGate for QuotaGate {
    fn admit(&self, owner: &OwnerId) -> bool {
        let key = owner.as_str().to_string();
        match self.limiter.check_key(&key) {
            Ok(()) => true,
            Err(not_until) => {
                let wait = not_until.wait_time_from(governor::clock::Clock::now(
                    &DefaultClock::default(),
                ));
                tracing::debug!(
                    owner = %owner,
                    retry_after_ms = wait.as_millis() as u64,
                    "upload quota exhausted"
                );
                false
            }
        }
    }

    fn cleanup(&self) -> usize {
        let before = self.limiter.len();
        // Buckets that have fully refilled carry no state worth keeping.
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }
}

/// Build the gate described by configuration.
pub fn from_config(config: &AdmissionConfig) -> Arc<dyn AdmissionGate> {
    if config.enabled {
        Arc::new(QuotaGate::new(config))
    } else {
        Arc::new(OpenGate)
    }
}

/// Spawn a background task that periodically drops idle uploader buckets.
pub fn spawn_cleanup_task(
    gate: Arc<dyn AdmissionGate>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = gate.cleanup();
            if evicted > 0 {
                tracing::info!(evicted = evicted, "admission gate evicted idle uploaders");
            }
        }
    })
}
