//! Long-running pass supervisor: `IdleWait -> Iterating -> (ErrorBackoff | IdleWait)`.
//!
//! Errors never escape. The retry count is unbounded; the backoff policy is
//! injectable. Cancellation is honored only between passes.
//!
//! Session bootstrap happens before a supervisor is built, so the machine
//! starts in `IdleWait`.

use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{pacing::BackoffPolicy, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    IdleWait,
    Iterating,
    ErrorBackoff,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub passes: u64,
    pub failures: u64,
}

pub struct Supervisor<B: BackoffPolicy> {
    name: &'static str,
    idle: Duration,
    backoff: B,
    cancel: CancellationToken,
    state: LoopState,
}

impl<B: BackoffPolicy> Supervisor<B> {
    pub fn new(name: &'static str, idle: Duration, backoff: B, cancel: CancellationToken) -> Self {
        Self {
            name,
            idle,
            backoff,
            cancel,
            state: LoopState::IdleWait,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Drive `pass` until cancelled.
    pub async fn run<T, F, Fut>(&mut self, mut pass: F) -> SupervisorStats
    where
        T: std::fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut stats = SupervisorStats::default();
        let mut consecutive_failures = 0u32;

        loop {
            self.transition(LoopState::IdleWait);
            if !self.wait(self.idle).await {
                break;
            }

            self.transition(LoopState::Iterating);
            stats.passes += 1;
            match pass().await {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    debug!(job = self.name, ?outcome, "pass finished");
                }
                Err(e) => {
                    stats.failures += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if e.is_transient() {
                        warn!(
                            job = self.name,
                            error = %e,
                            consecutive_failures,
                            "pass failed, will retry"
                        );
                    } else {
                        error!(job = self.name, error = %e, consecutive_failures, "pass failed");
                    }

                    // Never come back before the remote's own flood wait is over.
                    let delay = self
                        .backoff
                        .delay(consecutive_failures)
                        .max(e.retry_after().unwrap_or_default());
                    self.transition(LoopState::ErrorBackoff);
                    if !self.wait(delay).await {
                        break;
                    }
                }
            }
        }

        debug!(job = self.name, passes = stats.passes, "supervisor stopped");
        stats
    }

    fn transition(&mut self, next: LoopState) {
        self.state = next;
    }

    /// Sleep unless cancelled; returns false on cancellation.
    async fn wait(&self, d: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(d) => true,
        }
    }
}
