//! Per-track admission control in front of an encoder queue.
//!
//! `drop` releases a sample immediately when the queue is full. `wait`
//! backs off (10 ms, ×1.5, capped at 100 ms) for up to five attempts and then
//! drops anyway. Drops are never errors.

use std::time::Duration;

use ek_common::BackpressureStrategy;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
pub const MAX_BACKOFF: Duration = Duration::from_millis(100);
pub const BACKOFF_FACTOR: f64 = 1.5;
pub const MAX_WAIT_ATTEMPTS: u32 = 5;

/// Outcome of asking to submit one sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Release the sample without encoding it.
    Drop,
    /// A cancellation arrived while waiting.
    Interrupted,
}

/// Delays between queue-depth checks under `wait`.
pub fn backoff_schedule() -> impl Iterator<Item = Duration> {
    std::iter::successors(Some(INITIAL_BACKOFF), |prev| {
        Some(prev.mul_f64(BACKOFF_FACTOR).min(MAX_BACKOFF))
    })
    .take(MAX_WAIT_ATTEMPTS as usize)
}

#[derive(Copy, Clone, Debug)]
pub struct BackpressureController {
    strategy: BackpressureStrategy,
    max_queue_size: usize,
}

impl BackpressureController {
    pub fn new(strategy: BackpressureStrategy, max_queue_size: usize) -> Self {
        Self {
            strategy,
            max_queue_size: max_queue_size.max(1),
        }
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Decide whether a new sample may enter the queue.
    ///
    /// `depth` reports the current queue depth. `sleep` waits for the given
    /// duration and returns `true` if the wait was interrupted by a cancel.
    pub fn admit<D, S>(&self, mut depth: D, mut sleep: S) -> Admission
    where
        D: FnMut() -> usize,
        S: FnMut(Duration) -> bool,
    {
        if depth() < self.max_queue_size {
            return Admission::Accept;
        }
        if self.strategy == BackpressureStrategy::Drop {
            return Admission::Drop;
        }
        for delay in backoff_schedule() {
            if sleep(delay) {
                return Admission::Interrupted;
            }
            if depth() < self.max_queue_size {
                return Admission::Accept;
            }
        }
        Admission::Drop
    }
}
