//! Reconnect backoff policies.
//!
//! The session consults [`RetryState::evaluate`] on every work cycle while
//! disconnected; the state answers whether to attempt now, keep waiting, or
//! give up because the configured ceiling has passed.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

/// Base delay between attempts.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);
/// Upper bound on any computed delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(600);

/// Backoff shape applied between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Never retry; the first failure is terminal.
    None,
    /// Constant delay.
    Fixed,
    /// Delay grows by the base each attempt.
    Linear,
    /// Delay doubles each attempt.
    Exponential,
    /// Exponential with randomized spread to avoid thundering herds.
    #[default]
    ExponentialJitter,
    /// Uniformly random delay up to twice the base.
    Random,
}

/// Verdict for the current work cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt a reconnect now.
    Attempt,
    /// Backoff window still open.
    Wait,
    /// The retry window ceiling has passed; stop retrying.
    Expired,
}

/// Tracks failures since the last successful connect.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    /// Total window before giving up, measured from the first failure.
    /// `None` retries forever.
    timeout: Option<Duration>,
    first_failure: Option<Instant>,
    last_attempt: Option<Instant>,
    attempts: u32,
    /// The immediate retry owed for the failure that opened the window.
    immediate_pending: bool,
}

impl RetryState {
    pub fn new(policy: RetryPolicy, timeout: Option<Duration>) -> Self {
        Self {
            policy,
            timeout,
            first_failure: None,
            last_attempt: None,
            attempts: 0,
            immediate_pending: false,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Replaces the policy and restarts the failure window.
    pub fn reconfigure(&mut self, policy: RetryPolicy, timeout: Option<Duration>) {
        self.policy = policy;
        self.timeout = timeout;
        self.reset();
    }

    /// Clears failure history; called on a successful connect.
    pub fn reset(&mut self) {
        self.first_failure = None;
        self.last_attempt = None;
        self.attempts = 0;
        self.immediate_pending = false;
    }

    /// Records that a connect attempt was just issued.
    pub fn note_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Marks the start of the failure window if it is not already open. The
    /// failure that opens the window earns one immediate retry regardless of
    /// any attempt already recorded.
    pub fn note_failure(&mut self, now: Instant) {
        if self.first_failure.is_none() {
            self.first_failure = Some(now);
            self.immediate_pending = true;
        }
    }

    /// Decides what to do at `now` given the failure history. The first
    /// retry after a fresh failure is always immediate; later ones are gated
    /// by the policy's delay.
    pub fn evaluate(&mut self, now: Instant) -> RetryDecision {
        self.note_failure(now);

        if self.policy == RetryPolicy::None {
            return RetryDecision::Expired;
        }
        if let Some(timeout) = self.timeout {
            if let Some(first) = self.first_failure {
                if now.duration_since(first) >= timeout {
                    debug!(
                        elapsed_secs = now.duration_since(first).as_secs(),
                        "retry window closed"
                    );
                    return RetryDecision::Expired;
                }
            }
        }

        if self.immediate_pending {
            self.immediate_pending = false;
            return RetryDecision::Attempt;
        }
        let Some(last) = self.last_attempt else {
            return RetryDecision::Attempt;
        };
        if now.duration_since(last) >= self.delay_for(self.attempts) {
            RetryDecision::Attempt
        } else {
            RetryDecision::Wait
        }
    }

    /// Delay to wait after the `attempt`-th issued attempt (1-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = DEFAULT_RETRY_BASE;
        let raw = match self.policy {
            RetryPolicy::None => return Duration::ZERO,
            RetryPolicy::Fixed => base,
            RetryPolicy::Linear => base.saturating_mul(attempt.max(1)),
            RetryPolicy::Exponential => exponential(base, attempt),
            RetryPolicy::ExponentialJitter => {
                let exp = exponential(base, attempt);
                let half = exp / 2;
                let spread = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
                half + Duration::from_millis(spread / 2)
            }
            RetryPolicy::Random => {
                let ceiling = base.as_millis() as u64 * 2;
                Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
            }
        };
        raw.min(MAX_RETRY_DELAY)
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << shift).min(MAX_RETRY_DELAY)
}
