//! Debounce and retry timing shared by the sync engine and the backup
//! scheduler.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Largest exponent applied to the backoff base.
const MAX_EXPONENT: u32 = 16;

/// A resettable quiet-period timer.
///
/// Every [`poke`](Self::poke) pushes the deadline out by the full delay, so
/// only the last of a burst of pokes fires. Meant to be polled from a
/// `select!` loop through [`fired`](Self::fired).
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)arms the timer.
    pub fn poke(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes when the armed deadline passes, disarming the timer.
    /// Never completes while disarmed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

/// Capped exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the next retry, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Retries handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// A uniformly random delay in `[0, max]`.
pub fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
