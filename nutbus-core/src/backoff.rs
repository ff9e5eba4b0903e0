//! Exponential reconnect backoff and interruptible sleeps.
//!
//! Delays double from `initial` up to `max` and stay there until `reset()`
//! is called after a successful connection:
//! ```text
//! 1s, 2s, 4s, 8s, 16s, 32s, 64s, 64s, ...
//! ```

use std::time::Duration;

pub const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX: Duration = Duration::from_secs(64);

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff; `max` is raised to `initial` if given smaller.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
            attempt: 0,
        }
    }

    /// Returns the delay to wait before the next attempt and advances.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL, DEFAULT_MAX)
    }
}

/// Sleeps `total` in slices of `tick` (at least 1 ms), checking `keep_going`
/// before each slice. Returns false as soon as it reports false.
pub async fn pause_while<F>(total: Duration, tick: Duration, keep_going: F) -> bool
where
    F: Fn() -> bool,
{
    let tick = tick.max(Duration::from_millis(1));
    let mut remaining = total;
    while !remaining.is_zero() {
        if !keep_going() {
            return false;
        }
        let step = remaining.min(tick);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    keep_going()
}
