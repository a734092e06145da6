//! # Requeue Backoff
//!
//! Requeue delays for machines whose bootstrap pass failed with a retryable
//! error. Delays follow a Fibonacci sequence in whole minutes (1m, 1m, 2m,
//! 3m, 5m, 8m) capped at 10m, tracked separately for every Machine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

const MIN_DELAY_MINUTES: u64 = 1;
const MAX_DELAY_MINUTES: u64 = 10;

/// Fibonacci delay sequence capped at `max_minutes`
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
        }
    }

    /// Next delay; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next = (self.prev_minutes + self.current_minutes).min(self.max_minutes);
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next;
        delay
    }

    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

#[derive(Debug)]
struct MachineState {
    sequence: FibonacciBackoff,
    failures: u32,
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            sequence: FibonacciBackoff::new(MIN_DELAY_MINUTES, MAX_DELAY_MINUTES),
            failures: 0,
        }
    }
}

/// Consecutive-failure backoff keyed by Machine (`namespace/name`)
#[derive(Debug, Default)]
pub struct MachineBackoff {
    states: Mutex<HashMap<String, MachineState>>,
}

impl MachineBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed pass for `key`
    ///
    /// Returns the delay before the next pass and the number of consecutive
    /// failures including this one.
    pub fn record_failure(&self, key: &str) -> (Duration, u32) {
        match self.states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_default();
                state.failures += 1;
                (state.sequence.next_delay(), state.failures)
            }
            Err(e) => {
                warn!("Failed to lock backoff state for {}: {}, using minimum delay", key, e);
                (Duration::from_secs(MIN_DELAY_MINUTES * 60), 0)
            }
        }
    }

    /// Restart the sequence for `key`
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.failures = 0;
                state.sequence.reset();
            }
        }
    }

    /// Drop all state for a Machine that is going away
    pub fn forget(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(key);
        }
    }

    #[cfg(test)]
    pub fn failures(&self, key: &str) -> u32 {
        self.states
            .lock()
            .map(|states| states.get(key).map_or(0, |s| s.failures))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(delays: &[Duration]) -> Vec<u64> {
        delays.iter().map(|d| d.as_secs() / 60).collect()
    }

    #[test]
    fn test_sequence_caps_at_ten_minutes() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        let delays: Vec<Duration> = (0..9).map(|_| backoff.next_delay()).collect();
        assert_eq!(minutes(&delays), vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_secs(120));

        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(120));
    }

    #[test]
    fn test_machines_back_off_independently() {
        let backoff = MachineBackoff::new();

        assert_eq!(backoff.record_failure("ns/m1"), (Duration::from_secs(60), 1));
        assert_eq!(backoff.record_failure("ns/m1"), (Duration::from_secs(60), 2));
        assert_eq!(backoff.record_failure("ns/m1"), (Duration::from_secs(120), 3));

        assert_eq!(backoff.record_failure("ns/m2"), (Duration::from_secs(60), 1));
        assert_eq!(backoff.record_failure("other/m1"), (Duration::from_secs(60), 1));
        assert_eq!(backoff.failures("ns/m1"), 3);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let backoff = MachineBackoff::new();
        for _ in 0..4 {
            backoff.record_failure("ns/m1");
        }

        backoff.reset("ns/m1");

        assert_eq!(backoff.failures("ns/m1"), 0);
        assert_eq!(backoff.record_failure("ns/m1"), (Duration::from_secs(60), 1));
    }

    #[test]
    fn test_reset_unknown_machine_is_a_no_op() {
        let backoff = MachineBackoff::new();
        backoff.reset("ns/never-failed");
        assert_eq!(backoff.failures("ns/never-failed"), 0);
    }

    #[test]
    fn test_forget_drops_state() {
        let backoff = MachineBackoff::new();
        backoff.record_failure("ns/m1");
        backoff.record_failure("ns/m1");

        backoff.forget("ns/m1");

        assert_eq!(backoff.failures("ns/m1"), 0);
        assert_eq!(backoff.record_failure("ns/m1"), (Duration::from_secs(60), 1));
    }
}
