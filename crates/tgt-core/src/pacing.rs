//! Request pacing and failure backoff.
//!
//! Telegram penalizes bursty automated access on user accounts, so every wait
//! the agent performs is named here and can be zeroed for tests.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingConfig {
    /// Idle wait between two triage passes.
    pub poll_interval: Duration,
    /// Extra wait after a failed pass, on top of `poll_interval`.
    pub error_backoff: Duration,
    /// Pause right before a forward request.
    pub forward_delay: Duration,
    /// Pause after opening a connection.
    pub settle_delay: Duration,
    /// Pause before each digest history page.
    pub page_delay: Duration,
    /// Minimum spacing between *any* two transport calls.
    pub min_request_interval: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(100),
            error_backoff: Duration::from_secs(90),
            forward_delay: Duration::from_secs(10),
            settle_delay: Duration::from_secs(10),
            page_delay: Duration::from_secs(10),
            min_request_interval: Duration::from_secs(1),
        }
    }
}

impl PacingConfig {
    /// Zero-delay policy for tests.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            error_backoff: Duration::ZERO,
            forward_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
            min_request_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Shared pacing state for one job (triage loop or digest).
#[derive(Debug)]
pub struct Pacer {
    cfg: PacingConfig,
    limiter: Mutex<IntervalLimiter>,
}

impl Pacer {
    pub fn new(cfg: PacingConfig) -> Self {
        Self {
            cfg,
            limiter: Mutex::new(IntervalLimiter::new(cfg.min_request_interval)),
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.cfg
    }

    /// Wait for the next request slot.
    pub async fn throttle(&self) {
        let wait = { self.limiter.lock().await.reserve() };
        pause(wait).await;
    }

    pub async fn settle(&self) {
        pause(self.cfg.settle_delay).await;
    }

    pub async fn before_forward(&self) {
        pause(self.cfg.forward_delay).await;
    }

    pub async fn before_page(&self) {
        pause(self.cfg.page_delay).await;
    }
}

async fn pause(d: Duration) {
    if d > Duration::ZERO {
        sleep(d).await;
    }
}

/// How long to back off after a failed pass.
pub trait BackoffPolicy: Send + Sync {
    /// `consecutive_failures` is at least 1.
    fn delay(&self, consecutive_failures: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Clone, Copy, Debug)]
pub struct ConstantBackoff(pub Duration);

impl BackoffPolicy for ConstantBackoff {
    fn delay(&self, _consecutive_failures: u32) -> Duration {
        self.0
    }
}

/// Doubling delay, capped at `max`.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << shift)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }
}
