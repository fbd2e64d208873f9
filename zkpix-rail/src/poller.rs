//! Bounded settlement polling.
//!
//! Each attempt queries the rail once and moves the poll through
//! `Pending -> {Settled, Failed, TimedOut}`. The first observation happens
//! immediately; the configured interval separates later attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zkpix_common::{ExternalPaymentRecord, PaymentStatus};

use crate::{
    error::RailError,
    rail::{PaymentQuery, PaymentRail},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    Fixed,
    /// Multiply the delay by `factor` after each attempt, capped at `max`.
    Exponential { factor: u32, max: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay to wait after `attempt` (1-based) failed to reach a terminal status.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => {
                let mut delay = self.interval;
                for _ in 1..attempt {
                    delay = delay.saturating_mul(factor.max(1));
                    if delay >= max {
                        return max;
                    }
                }
                delay.min(max)
            }
        }
    }
}

/// Where a poll currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Pending { attempts: u32 },
    Settled,
    Failed,
    TimedOut { attempts: u32 },
}

impl PollState {
    fn observe(self, status: PaymentStatus, max_attempts: u32) -> Self {
        match (self, status) {
            (PollState::Pending { .. }, PaymentStatus::Settled) => PollState::Settled,
            (PollState::Pending { .. }, PaymentStatus::Failed) => PollState::Failed,
            (PollState::Pending { attempts }, PaymentStatus::Pending) => {
                let attempts = attempts + 1;
                if attempts >= max_attempts {
                    PollState::TimedOut { attempts }
                } else {
                    PollState::Pending { attempts }
                }
            }
            (terminal, _) => terminal,
        }
    }
}

pub struct SettlementPoller<'a, R: ?Sized> {
    rail: &'a R,
}

impl<'a, R: PaymentRail + ?Sized> SettlementPoller<'a, R> {
    pub fn new(rail: &'a R) -> Self {
        Self { rail }
    }

    /// Poll until the payment settles, fails, runs out of attempts, or `cancel` fires.
    ///
    /// Returns the settled record. Rail errors end the poll immediately.
    pub async fn await_settlement(
        &self,
        query: &PaymentQuery,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ExternalPaymentRecord, RailError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut state = PollState::Pending { attempts: 0 };

        loop {
            if cancel.is_cancelled() {
                return Err(RailError::Cancelled);
            }
            let record = tokio::select! {
                _ = cancel.cancelled() => return Err(RailError::Cancelled),
                record = self.rail.payment_status(query) => record?,
            };
            state = state.observe(record.status, max_attempts);
            debug!(
                kind = query.kind(),
                id = query.id(),
                raw_status = %record.raw_status,
                ?state,
                "settlement poll"
            );

            match state {
                PollState::Settled => {
                    info!(kind = query.kind(), id = query.id(), "payment settled");
                    return Ok(record);
                }
                PollState::Failed => {
                    warn!(kind = query.kind(), id = query.id(), raw_status = %record.raw_status, "payment failed on rail");
                    return Err(RailError::SettlementFailed {
                        status: record.raw_status,
                    });
                }
                PollState::TimedOut { attempts } => {
                    warn!(kind = query.kind(), id = query.id(), attempts, "settlement poll exhausted");
                    return Err(RailError::SettlementTimeout { attempts });
                }
                PollState::Pending { attempts } => {
                    let delay = policy.delay_after(attempts);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RailError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
